//! Dispatch memo
//!
//! For every memoized operation, a map from instance to the class whose hook
//! should be tried next. The engine offers an operation to each class of an
//! instance's chain in turn, while dispatch always starts from the leaf; the
//! memo lets later offers skip classes that already declined.
//!
//! Entries only ever move toward the root. They are removed when an
//! operation is handled, when the chain is exhausted, when a hook throws,
//! and when the instance is finalized. A resolution still running when its
//! instance is finalized may pin after that purge; the trampoline checks the
//! instance's private data once dispatch returns and purges again.

use crate::class::ClassDescriptor;
use crate::config::config;
use crate::handle::{ClassId, ObjectRef};
use crate::hooks::HookKind;
use dashmap::DashMap;
use std::sync::{Arc, LazyLock};

type MemoMap = DashMap<ObjectRef, Arc<ClassDescriptor>>;

/// One map per memoized operation, shared by every hierarchy
pub struct DispatchMemo {
    maps: [MemoMap; HookKind::MEMOIZED],
}

static MEMO: LazyLock<DispatchMemo> = LazyLock::new(DispatchMemo::new);

/// The process-wide memo
pub fn memo() -> &'static DispatchMemo {
    &MEMO
}

impl DispatchMemo {
    fn new() -> Self {
        let config = config();
        Self {
            maps: std::array::from_fn(|_| config.new_map(config.memo_capacity)),
        }
    }

    fn map(&self, kind: HookKind) -> Option<&MemoMap> {
        kind.memo_slot().map(|slot| &self.maps[slot])
    }

    /// The class to try next for `kind` on `instance`
    pub fn get(&self, kind: HookKind, instance: ObjectRef) -> Option<Arc<ClassDescriptor>> {
        self.map(kind)?.get(&instance).map(|entry| entry.clone())
    }

    pub(crate) fn pin(&self, kind: HookKind, instance: ObjectRef, class: Arc<ClassDescriptor>) {
        if let Some(map) = self.map(kind) {
            map.insert(instance, class);
        }
    }

    pub(crate) fn clear(&self, kind: HookKind, instance: ObjectRef) {
        if let Some(map) = self.map(kind) {
            map.remove(&instance);
        }
    }

    /// Drop every entry for `instance`; returns how many were removed
    pub(crate) fn purge_instance(&self, instance: ObjectRef) -> usize {
        self.maps
            .iter()
            .filter(|map| map.remove(&instance).is_some())
            .count()
    }

    /// Drop every entry naming the class `id`
    pub(crate) fn purge_class(&self, id: ClassId) {
        for map in &self.maps {
            map.retain(|_, class| class.id() != id);
        }
    }

    /// Whether any operation has an entry for `instance`
    pub fn contains_instance(&self, instance: ObjectRef) -> bool {
        self.maps.iter().any(|map| map.contains_key(&instance))
    }

    pub fn len(&self, kind: HookKind) -> usize {
        self.map(kind).map_or(0, |map| map.len())
    }
}
