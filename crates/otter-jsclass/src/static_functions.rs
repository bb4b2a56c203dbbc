//! Static function tables
//!
//! Besides the frozen record array, a function table remembers for each live
//! instance which function objects the engine created for its entries. The
//! engine only hands the function object back when it is called, so that
//! binding is how a call finds its callback.

use crate::attributes::PropertyAttributes;
use crate::boundary::Boundary;
use crate::buffer::RawBuffer;
use crate::error::{JsClassError, JsClassResult};
use crate::handle::{ContextRef, ObjectRef};
use crate::hooks::CallAsFunctionHook;
use crate::layout::{StaticFunctionRecord, layouts};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

const WHAT: &str = "static function table";

struct StaticFunction {
    name: CString,
    callback: Option<CallAsFunctionHook>,
    attributes: PropertyAttributes,
}

#[derive(Default)]
struct TableState {
    entries: Vec<StaticFunction>,
    frozen: Option<Arc<RawBuffer>>,
    disposed: bool,
}

/// Function objects the engine created for one instance, by entry index
#[derive(Debug, Default)]
pub struct FunctionBinding {
    handles: HashMap<ObjectRef, usize>,
}

impl FunctionBinding {
    pub fn index_of(&self, function: ObjectRef) -> Option<usize> {
        self.handles.get(&function).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Static function properties shared by every instance of a class
#[derive(Default)]
pub struct StaticFunctionTable {
    state: RwLock<TableState>,
    bindings: DashMap<ObjectRef, Arc<FunctionBinding>>,
}

impl StaticFunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a function. Fails once the table is frozen.
    pub fn add(
        &self,
        name: &str,
        callback: Option<CallAsFunctionHook>,
        attributes: PropertyAttributes,
    ) -> JsClassResult<()> {
        let c_name = CString::new(name).map_err(|_| JsClassError::InvalidName(name.into()))?;

        let mut state = self.state.write();
        if state.disposed {
            return Err(JsClassError::Disposed(WHAT.into()));
        }
        if state.frozen.is_some() {
            return Err(JsClassError::frozen(WHAT));
        }
        if state.entries.iter().any(|e| e.name == c_name) {
            return Err(JsClassError::DuplicateName(name.into()));
        }
        state.entries.push(StaticFunction {
            name: c_name,
            callback,
            attributes,
        });
        Ok(())
    }

    /// Freeze the table and return its record array.
    pub fn serialize(&self) -> JsClassResult<Arc<RawBuffer>> {
        {
            let state = self.state.read();
            if state.disposed {
                return Err(JsClassError::Disposed(WHAT.into()));
            }
            if let Some(buffer) = &state.frozen {
                return Ok(buffer.clone());
            }
        }

        let layouts = layouts()?;
        let mut state = self.state.write();
        if state.disposed {
            return Err(JsClassError::Disposed(WHAT.into()));
        }
        if let Some(buffer) = &state.frozen {
            return Ok(buffer.clone());
        }

        let records: Vec<_> = state
            .entries
            .iter()
            .map(|entry| StaticFunctionRecord {
                name: entry.name.as_ptr() as usize,
                has_callback: entry.callback.is_some(),
                attributes: entry.attributes.bits(),
            })
            .collect();
        let buffer = Arc::new(layouts.encode_static_functions(&records));
        debug!(entries = records.len(), "Froze static function table");
        state.frozen = Some(buffer.clone());
        Ok(buffer)
    }

    pub fn is_frozen(&self) -> bool {
        self.state.read().frozen.is_some()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.state
            .read()
            .entries
            .iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect()
    }

    /// Record the function objects the engine created for `instance`.
    ///
    /// `handles[i]` belongs to entry `i`; missing handles are skipped. A
    /// binding that already exists wins over a concurrent one.
    pub fn bind(&self, instance: ObjectRef, handles: &[Option<ObjectRef>]) -> Arc<FunctionBinding> {
        let binding = FunctionBinding {
            handles: handles
                .iter()
                .enumerate()
                .filter_map(|(index, handle)| handle.map(|h| (h, index)))
                .filter(|(h, _)| !h.is_null())
                .collect(),
        };
        self.bindings
            .entry(instance)
            .or_insert_with(|| Arc::new(binding))
            .clone()
    }

    pub fn binding(&self, instance: ObjectRef) -> Option<Arc<FunctionBinding>> {
        self.bindings.get(&instance).map(|b| b.clone())
    }

    /// The binding for `instance`, asking the engine for it on first use.
    pub fn ensure_bound(
        &self,
        ctx: ContextRef,
        instance: ObjectRef,
        boundary: &dyn Boundary,
    ) -> Arc<FunctionBinding> {
        if let Some(binding) = self.binding(instance) {
            return binding;
        }

        let names: Vec<CString> = self
            .state
            .read()
            .entries
            .iter()
            .map(|e| e.name.clone())
            .collect();
        let handles = boundary.static_function_handles(ctx, instance, &names);
        trace!(?instance, functions = handles.len(), "Bound static functions");
        self.bind(instance, &handles)
    }

    /// Callback for `function` as bound on `instance`, if this table owns it
    pub fn callback_for(
        &self,
        instance: ObjectRef,
        function: ObjectRef,
    ) -> Option<CallAsFunctionHook> {
        let index = self.binding(instance)?.index_of(function)?;
        self.state.read().entries.get(index)?.callback.clone()
    }

    pub fn unbind(&self, instance: ObjectRef) -> bool {
        self.bindings.remove(&instance).is_some()
    }

    pub fn bound_instances(&self) -> usize {
        self.bindings.len()
    }

    /// Release entries, names, bindings and the frozen buffer
    pub fn dispose(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.frozen = None;
        state.disposed = true;
        drop(state);
        self.bindings.clear();
    }
}

impl fmt::Debug for StaticFunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticFunctionTable")
            .field("names", &self.names())
            .field("frozen", &self.is_frozen())
            .field("bound_instances", &self.bound_instances())
            .finish()
    }
}
