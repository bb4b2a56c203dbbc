//! The engine boundary
//!
//! Everything the dispatch core needs from the engine goes through one
//! [`Boundary`] installed per process. The `jsc` feature provides the real
//! JavaScriptCore implementation; tests install a simulated engine.

use crate::buffer::RawBuffer;
use crate::error::{JsClassError, JsClassResult};
use crate::handle::{AccumulatorRef, ClassRef, ContextRef, ObjectRef, StringRef, ValueRef};
use otter_jsclass_sys::{JSObjectCallAsConstructorCallback, JSObjectCallAsFunctionCallback};
use std::ffi::{CStr, CString};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Engine operations consumed by the dispatch core.
///
/// Implementations must be callable from any thread, including from
/// within finalization.
pub trait Boundary: Send + Sync {
    /// Create an engine class from a serialized definition.
    ///
    /// The buffer and everything it points to stay alive until
    /// [`release_class`](Boundary::release_class) is called.
    fn create_class(&self, definition: &RawBuffer) -> Option<ClassRef>;

    fn release_class(&self, class: ClassRef);

    /// Create an instance whose private data is `private` during `initialize`
    fn make_object(&self, ctx: ContextRef, class: ClassRef, private: usize) -> ObjectRef;

    fn make_function(
        &self,
        ctx: ContextRef,
        name: &CStr,
        callback: JSObjectCallAsFunctionCallback,
    ) -> ObjectRef;

    fn make_constructor(
        &self,
        ctx: ContextRef,
        class: Option<ClassRef>,
        callback: JSObjectCallAsConstructorCallback,
    ) -> ObjectRef;

    fn private_data(&self, object: ObjectRef) -> usize;

    fn set_private_data(&self, object: ObjectRef, data: usize) -> bool;

    fn string_to_rust(&self, string: StringRef) -> String;

    fn add_property_name(&self, accumulator: AccumulatorRef, name: &str);

    /// Look up, on `instance`, the function object the engine created for
    /// each static function name. Unknown names yield `None`.
    fn static_function_handles(
        &self,
        ctx: ContextRef,
        instance: ObjectRef,
        names: &[CString],
    ) -> Vec<Option<ObjectRef>>;

    /// Build an error value carrying `message`, for reporting panics
    fn make_error(&self, ctx: ContextRef, message: &str) -> ValueRef;
}

static BOUNDARY: OnceLock<Arc<dyn Boundary>> = OnceLock::new();

/// Install the process boundary. Only the first call succeeds.
pub fn install_boundary(boundary: Arc<dyn Boundary>) -> JsClassResult<()> {
    BOUNDARY
        .set(boundary)
        .map_err(|_| JsClassError::BoundaryAlreadyInstalled)?;
    debug!("Installed engine boundary");
    Ok(())
}

/// The installed boundary
pub fn boundary() -> JsClassResult<&'static dyn Boundary> {
    BOUNDARY
        .get()
        .map(|b| &**b)
        .ok_or(JsClassError::BoundaryNotInstalled)
}

pub fn is_installed() -> bool {
    BOUNDARY.get().is_some()
}
