//! Dispatch resolution along the class chain
//!
//! The engine offers each intercepted operation to every class of an
//! instance's chain that fills the matching slot, leaf first. Every offer
//! arrives at the same trampoline, which only knows the instance's leaf
//! class. Resolution therefore starts at the leaf and consults the memo to
//! pick up where the previous offer stopped:
//!
//! 1. A memo entry naming another class redirects there.
//! 2. Otherwise the class's own hook runs. Handling clears the entry.
//! 3. Declining (or having no hook) moves the entry to the parent. A hook
//!    that declined ends this offer; a missing hook continues immediately.
//! 4. At the root the entry is cleared and the operation is not handled.
//!
//! `callAsFunction`, static functions and static values do not use the
//! memo: they walk leaf to root looking for the first class that owns the
//! call.

use crate::boundary::Boundary;
use crate::class::ClassDescriptor;
use crate::error::{HookResult, JsClassError, JsClassResult, ScriptException};
use crate::handle::{ContextRef, ObjectRef, ValueRef};
use crate::hooks::{HookKind, JsType, PropertyNames};
use crate::memo::memo;
use std::sync::Arc;
use tracing::trace;

/// Outcome of dispatching one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<T> {
    Handled(T),
    NotHandled,
    /// A hook threw; the value goes to the exception slot
    Threw(ValueRef),
}

impl<T> Resolution<T> {
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }

    pub fn handled(self) -> Option<T> {
        match self {
            Self::Handled(value) => Some(value),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<ValueRef> {
        match self {
            Self::Threw(value) => Some(*value),
            _ => None,
        }
    }
}

/// What one class did with an operation
enum Step<T> {
    Handled(T),
    Declined,
    Absent,
    Threw(ValueRef),
}

impl<T> Step<T> {
    fn from_hook(result: HookResult<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Self::Handled(value),
            Ok(None) => Self::Declined,
            Err(ScriptException(value)) => Self::Threw(value),
        }
    }
}

impl Step<()> {
    fn from_flag(result: HookResult<bool>) -> Self {
        match result {
            Ok(true) => Self::Handled(()),
            Ok(false) => Self::Declined,
            Err(ScriptException(value)) => Self::Threw(value),
        }
    }
}

/// Result of a hook that always handles; `None` becomes a null value
fn settle<T: Default>(result: HookResult<Option<T>>) -> Resolution<T> {
    match result {
        Ok(value) => Resolution::Handled(value.unwrap_or_default()),
        Err(ScriptException(value)) => Resolution::Threw(value),
    }
}

fn resolve<T>(
    kind: HookKind,
    instance: ObjectRef,
    leaf: &Arc<ClassDescriptor>,
    mut attempt: impl FnMut(&ClassDescriptor) -> Step<T>,
) -> Resolution<T> {
    let memo = memo();
    let mut class = leaf.clone();

    loop {
        if let Some(pinned) = memo.get(kind, instance) {
            if pinned.id() != class.id() {
                trace!(%kind, ?instance, from = class.name(), to = pinned.name(), "Resuming at memoized class");
                class = pinned;
                continue;
            }
        }

        let hooked = match attempt(&*class) {
            Step::Handled(value) => {
                trace!(%kind, ?instance, class = class.name(), "Handled");
                memo.clear(kind, instance);
                return Resolution::Handled(value);
            }
            Step::Threw(exception) => {
                trace!(%kind, ?instance, class = class.name(), "Hook threw");
                memo.clear(kind, instance);
                return Resolution::Threw(exception);
            }
            Step::Declined => true,
            Step::Absent => false,
        };

        match class.parent() {
            Some(parent) => {
                trace!(%kind, ?instance, class = class.name(), next = parent.name(), hooked, "Moving to parent");
                memo.pin(kind, instance, parent.clone());
                if hooked {
                    return Resolution::NotHandled;
                }
                class = parent;
            }
            None => {
                trace!(%kind, ?instance, class = class.name(), "Chain exhausted");
                memo.clear(kind, instance);
                return Resolution::NotHandled;
            }
        }
    }
}

pub fn has_property(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    object: ObjectRef,
    name: &str,
) -> bool {
    resolve(HookKind::HasProperty, object, leaf, |class| {
        match class.with_hooks(|h| h.has_property.clone()) {
            Some(hook) if hook(ctx, object, name) => Step::Handled(()),
            Some(_) => Step::Declined,
            None => Step::Absent,
        }
    })
    .is_handled()
}

pub fn get_property(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    object: ObjectRef,
    name: &str,
) -> Resolution<ValueRef> {
    resolve(HookKind::GetProperty, object, leaf, |class| {
        match class.with_hooks(|h| h.get_property.clone()) {
            Some(hook) => Step::from_hook(hook(ctx, object, name)),
            None => Step::Absent,
        }
    })
}

pub fn set_property(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    object: ObjectRef,
    name: &str,
    value: ValueRef,
) -> Resolution<()> {
    resolve(HookKind::SetProperty, object, leaf, |class| {
        match class.with_hooks(|h| h.set_property.clone()) {
            Some(hook) => Step::from_flag(hook(ctx, object, name, value)),
            None => Step::Absent,
        }
    })
}

pub fn delete_property(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    object: ObjectRef,
    name: &str,
) -> Resolution<()> {
    resolve(HookKind::DeleteProperty, object, leaf, |class| {
        match class.with_hooks(|h| h.delete_property.clone()) {
            Some(hook) => Step::from_flag(hook(ctx, object, name)),
            None => Step::Absent,
        }
    })
}

/// Collect names from the next class in line. There is no handled signal,
/// so every offer moves the memo forward and the names add up over the
/// engine's walk.
pub fn get_property_names(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    object: ObjectRef,
    names: &mut PropertyNames,
) {
    resolve::<()>(HookKind::GetPropertyNames, object, leaf, |class| {
        match class.with_hooks(|h| h.get_property_names.clone()) {
            Some(hook) => {
                hook(ctx, object, names);
                Step::Declined
            }
            None => Step::Absent,
        }
    });
}

/// Construct through the first class in line with a constructor hook.
/// A defined hook always handles.
pub fn call_as_constructor(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    constructor: ObjectRef,
    arguments: &[ValueRef],
) -> JsClassResult<Resolution<ObjectRef>> {
    let resolution = resolve(HookKind::CallAsConstructor, constructor, leaf, |class| {
        match class.with_hooks(|h| h.call_as_constructor.clone()) {
            Some(hook) => match hook(ctx, constructor, arguments) {
                Ok(object) => Step::Handled(object.unwrap_or_default()),
                Err(ScriptException(exception)) => Step::Threw(exception),
            },
            None => Step::Absent,
        }
    });

    match resolution {
        Resolution::NotHandled => Err(JsClassError::NoHookInChain {
            operation: HookKind::CallAsConstructor.name(),
            class: leaf.id(),
        }),
        resolved => Ok(resolved),
    }
}

pub fn has_instance(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    constructor: ObjectRef,
    possible_instance: ValueRef,
) -> Resolution<()> {
    resolve(HookKind::HasInstance, constructor, leaf, |class| {
        match class.with_hooks(|h| h.has_instance.clone()) {
            Some(hook) => Step::from_flag(hook(ctx, constructor, possible_instance)),
            None => Step::Absent,
        }
    })
}

pub fn convert_to_type(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    object: ObjectRef,
    target: JsType,
) -> Resolution<ValueRef> {
    resolve(HookKind::ConvertToType, object, leaf, |class| {
        match class.with_hooks(|h| h.convert_to_type.clone()) {
            Some(hook) => Step::from_hook(hook(ctx, object, target)),
            None => Step::Absent,
        }
    })
}

/// Call through the nearest class with a `callAsFunction` hook
pub fn call_as_function(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    function: ObjectRef,
    this: ObjectRef,
    arguments: &[ValueRef],
) -> JsClassResult<Resolution<ValueRef>> {
    for class in leaf.ancestors() {
        if let Some(hook) = class.with_hooks(|h| h.call_as_function.clone()) {
            trace!(?function, class = class.name(), "Calling object as function");
            return Ok(settle(hook(ctx, function, this, arguments)));
        }
    }
    Err(JsClassError::NoHookInChain {
        operation: HookKind::CallAsFunction.name(),
        class: leaf.id(),
    })
}

/// Call the static function whose engine handle is `function`.
///
/// Each table is asked, leaf to root, whether `function` is one of the
/// function objects it bound on `this`; bindings are fetched from the
/// engine on first use.
pub fn call_static_function(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    function: ObjectRef,
    this: ObjectRef,
    arguments: &[ValueRef],
    boundary: &dyn Boundary,
) -> JsClassResult<Resolution<ValueRef>> {
    for class in leaf.ancestors() {
        let Some(table) = class.static_functions() else {
            continue;
        };
        table.ensure_bound(ctx, this, boundary);
        if let Some(callback) = table.callback_for(this, function) {
            trace!(?function, class = class.name(), "Calling static function");
            return Ok(settle(callback(ctx, function, this, arguments)));
        }
    }
    Err(JsClassError::UnregisteredCallback {
        kind: "static function",
        handle: function,
    })
}

/// Read a static value from the nearest class that declares `name`
pub fn get_static_value(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    object: ObjectRef,
    name: &str,
) -> JsClassResult<Resolution<ValueRef>> {
    for class in leaf.ancestors() {
        let Some((getter, _)) = class.static_values().and_then(|t| t.lookup(name)) else {
            continue;
        };
        let resolution = match getter {
            Some(getter) => match getter(ctx, object, name) {
                Ok(Some(value)) => Resolution::Handled(value),
                Ok(None) => Resolution::NotHandled,
                Err(ScriptException(exception)) => Resolution::Threw(exception),
            },
            None => Resolution::NotHandled,
        };
        return Ok(resolution);
    }
    Err(JsClassError::StaticValueNotFound {
        name: name.to_string(),
        class: leaf.id(),
    })
}

/// Write a static value through the nearest class that declares `name`.
/// Nobody declaring it is simply not handled.
pub fn set_static_value(
    ctx: ContextRef,
    leaf: &Arc<ClassDescriptor>,
    object: ObjectRef,
    name: &str,
    value: ValueRef,
) -> Resolution<()> {
    for class in leaf.ancestors() {
        let Some((_, setter)) = class.static_values().and_then(|t| t.lookup(name)) else {
            continue;
        };
        return match setter {
            Some(setter) => match setter(ctx, object, name, value) {
                Ok(true) => Resolution::Handled(()),
                Ok(false) => Resolution::NotHandled,
                Err(ScriptException(exception)) => Resolution::Threw(exception),
            },
            None => Resolution::NotHandled,
        };
    }
    Resolution::NotHandled
}
