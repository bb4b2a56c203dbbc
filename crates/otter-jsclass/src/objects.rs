//! Creating engine objects backed by host callbacks

use crate::adhoc::registry;
use crate::boundary::boundary;
use crate::class::ClassDescriptor;
use crate::error::{JsClassError, JsClassResult};
use crate::handle::{ContextRef, ObjectRef};
use crate::hooks::{CallAsConstructorHook, CallAsFunctionHook};
use crate::lifecycle;
use crate::trampoline::{adhoc_constructor_trampoline, adhoc_function_trampoline};
use std::ffi::CString;
use std::sync::Arc;
use tracing::debug;

/// Create an instance of `class`, creating the engine class on first use.
///
/// The instance's private data names its leaf class, which is how every
/// hook invocation finds its way back to `class`.
pub fn make_instance(ctx: ContextRef, class: &Arc<ClassDescriptor>) -> JsClassResult<ObjectRef> {
    if class.is_disposed() {
        return Err(JsClassError::Disposed(class.name().to_string()));
    }
    let class_ref = class.class_ref()?;
    let boundary = boundary()?;
    let object = lifecycle::create_instance(class, || {
        boundary.make_object(ctx, class_ref, class.id().as_private())
    });
    debug!(class = class.name(), ?object, "Created instance");
    Ok(object)
}

/// Create a standalone function object that calls `callback`.
pub fn make_function(
    ctx: ContextRef,
    name: &str,
    callback: CallAsFunctionHook,
) -> JsClassResult<ObjectRef> {
    let c_name = CString::new(name).map_err(|_| JsClassError::InvalidName(name.into()))?;
    let function = boundary()?.make_function(ctx, &c_name, Some(adhoc_function_trampoline));
    registry().register_function(function, callback);
    debug!(name, ?function, "Created ad hoc function");
    Ok(function)
}

/// Create a constructor object that calls `callback` when used with `new`.
///
/// With a class, `instanceof` checks against the constructor use that
/// class's instances.
pub fn make_constructor(
    ctx: ContextRef,
    class: Option<&Arc<ClassDescriptor>>,
    callback: CallAsConstructorHook,
) -> JsClassResult<ObjectRef> {
    let class_ref = class.map(|class| class.class_ref()).transpose()?;
    let constructor =
        boundary()?.make_constructor(ctx, class_ref, Some(adhoc_constructor_trampoline));
    registry().register_constructor(constructor, callback);
    debug!(?constructor, "Created ad hoc constructor");
    Ok(constructor)
}
