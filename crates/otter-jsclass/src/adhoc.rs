//! Ad hoc function and constructor callbacks
//!
//! Functions and constructors made outside any class definition all share
//! one trampoline each. The registry maps the engine handle of each such
//! object to its callback. Entries live until explicitly removed.

use crate::config::config;
use crate::dispatch::Resolution;
use crate::error::{JsClassError, JsClassResult, ScriptException};
use crate::handle::{ContextRef, ObjectRef, ValueRef};
use crate::hooks::{CallAsConstructorHook, CallAsFunctionHook};
use dashmap::DashMap;
use std::sync::LazyLock;
use tracing::trace;

pub struct AdHocCallbackRegistry {
    functions: DashMap<ObjectRef, CallAsFunctionHook>,
    constructors: DashMap<ObjectRef, CallAsConstructorHook>,
}

static REGISTRY: LazyLock<AdHocCallbackRegistry> = LazyLock::new(AdHocCallbackRegistry::new);

/// The process-wide registry used by the ad hoc trampolines
pub fn registry() -> &'static AdHocCallbackRegistry {
    &REGISTRY
}

impl Default for AdHocCallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdHocCallbackRegistry {
    pub fn new() -> Self {
        let config = config();
        Self {
            functions: config.new_map(config.instance_capacity),
            constructors: config.new_map(config.instance_capacity),
        }
    }

    /// Map `function` to `callback`, replacing any previous entry
    pub fn register_function(&self, function: ObjectRef, callback: CallAsFunctionHook) {
        self.functions.insert(function, callback);
    }

    pub fn register_constructor(&self, constructor: ObjectRef, callback: CallAsConstructorHook) {
        self.constructors.insert(constructor, callback);
    }

    pub fn invoke_function(
        &self,
        ctx: ContextRef,
        function: ObjectRef,
        this: ObjectRef,
        arguments: &[ValueRef],
    ) -> JsClassResult<Resolution<ValueRef>> {
        let callback = self
            .functions
            .get(&function)
            .map(|entry| entry.clone())
            .ok_or(JsClassError::UnregisteredCallback {
                kind: "function",
                handle: function,
            })?;
        trace!(?function, "Invoking ad hoc function");
        Ok(match callback(ctx, function, this, arguments) {
            Ok(value) => Resolution::Handled(value.unwrap_or_default()),
            Err(ScriptException(exception)) => Resolution::Threw(exception),
        })
    }

    pub fn invoke_constructor(
        &self,
        ctx: ContextRef,
        constructor: ObjectRef,
        arguments: &[ValueRef],
    ) -> JsClassResult<Resolution<ObjectRef>> {
        let callback = self
            .constructors
            .get(&constructor)
            .map(|entry| entry.clone())
            .ok_or(JsClassError::UnregisteredCallback {
                kind: "constructor",
                handle: constructor,
            })?;
        trace!(?constructor, "Invoking ad hoc constructor");
        Ok(match callback(ctx, constructor, arguments) {
            Ok(object) => Resolution::Handled(object.unwrap_or_default()),
            Err(ScriptException(exception)) => Resolution::Threw(exception),
        })
    }

    pub fn remove_function(&self, function: ObjectRef) -> bool {
        self.functions.remove(&function).is_some()
    }

    pub fn remove_constructor(&self, constructor: ObjectRef) -> bool {
        self.constructors.remove(&constructor).is_some()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn constructor_count(&self) -> usize {
        self.constructors.len()
    }
}
