//! Instance initialization and finalization

use crate::class::ClassDescriptor;
use crate::config::config;
use crate::handle::{ContextRef, ObjectRef};
use crate::memo::memo;
use dashmap::DashMap;
use std::cell::Cell;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static INITIALIZED: LazyLock<DashMap<ObjectRef, ()>> =
    LazyLock::new(|| config().new_map(config().instance_capacity));

thread_local! {
    /// Set while this thread is inside the engine's object constructor
    static CREATING: Cell<bool> = const { Cell::new(false) };
}

/// Create an instance of `leaf` through `make`, starting from a clean slate.
///
/// The engine may reuse the address of an object it finalized without
/// telling us, which happens for classes that opt out of finalize
/// forwarding. Whatever is still recorded for the address is released
/// before the engine's first initialize call, or after `make` returns when
/// no class in the chain initializes.
pub(crate) fn create_instance(
    leaf: &Arc<ClassDescriptor>,
    make: impl FnOnce() -> ObjectRef,
) -> ObjectRef {
    let outer = CREATING.replace(true);
    let object = make();
    if CREATING.replace(outer) && !object.is_null() {
        release_instance(leaf, object);
    }
    object
}

/// Run the initialize hooks of the chain, root first.
///
/// The engine initializes an instance once per class that fills the
/// slot; only the first of those calls runs the hooks. Returns whether
/// this call did.
pub fn initialize(ctx: ContextRef, leaf: &Arc<ClassDescriptor>, object: ObjectRef) -> bool {
    if CREATING.replace(false) {
        release_instance(leaf, object);
    }
    if INITIALIZED.insert(object, ()).is_some() {
        return false;
    }

    let chain: Vec<_> = leaf.ancestors().collect();
    for class in chain.iter().rev() {
        if let Some(hook) = class.with_hooks(|h| h.initialize.clone()) {
            hook(ctx, object);
        }
    }
    true
}

pub fn is_initialized(object: ObjectRef) -> bool {
    INITIALIZED.contains_key(&object)
}

/// Run every finalize hook of the chain, leaf first, then release the
/// instance's dispatch state.
///
/// Callers make sure this runs once per instance.
pub fn finalize(leaf: &Arc<ClassDescriptor>, object: ObjectRef) {
    for class in leaf.ancestors() {
        if let Some(hook) = class.with_hooks(|h| h.finalize.clone()) {
            hook(object);
        }
    }
    release_instance(leaf, object);
}

/// Drop memo entries, static function bindings and the initialized marker
/// of `object`.
pub fn release_instance(leaf: &Arc<ClassDescriptor>, object: ObjectRef) {
    let memo_entries = forget_instance(object);
    let bindings = leaf
        .ancestors()
        .filter_map(|class| class.static_functions())
        .filter(|table| table.unbind(object))
        .count();
    debug!(?object, class = leaf.name(), memo_entries, bindings, "Released instance state");
}

/// Drop the state of `object` that does not depend on its class: memo
/// entries and the initialized marker. Returns the memo entries removed.
///
/// Static function bindings live in the class's tables; a disposed class
/// already dropped them.
pub fn forget_instance(object: ObjectRef) -> usize {
    INITIALIZED.remove(&object);
    memo().purge_instance(object)
}
