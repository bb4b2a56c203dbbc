//! Static value tables
//!
//! An ordered list of named properties with optional getter and setter hooks.
//! The table freezes into an engine-readable record array the first time it
//! is serialized; after that its shape is fixed.

use crate::attributes::PropertyAttributes;
use crate::buffer::RawBuffer;
use crate::error::{JsClassError, JsClassResult};
use crate::hooks::{GetPropertyHook, SetPropertyHook};
use crate::layout::{StaticValueRecord, layouts};
use parking_lot::RwLock;
use std::ffi::CString;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const WHAT: &str = "static value table";

struct StaticValue {
    name: CString,
    getter: Option<GetPropertyHook>,
    setter: Option<SetPropertyHook>,
    attributes: PropertyAttributes,
}

#[derive(Default)]
struct TableState {
    entries: Vec<StaticValue>,
    frozen: Option<Arc<RawBuffer>>,
    disposed: bool,
}

/// Static value properties shared by every instance of a class
#[derive(Default)]
pub struct StaticPropertyTable {
    state: RwLock<TableState>,
}

impl StaticPropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a property. Fails once the table is frozen.
    pub fn add(
        &self,
        name: &str,
        getter: Option<GetPropertyHook>,
        setter: Option<SetPropertyHook>,
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
        state.entries.push(StaticValue {
            name: c_name,
            getter,
            setter,
            attributes,
        });
        Ok(())
    }

    /// Freeze the table and return its record array.
    ///
    /// Every caller receives the buffer produced by the first freeze.
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
            .map(|entry| StaticValueRecord {
                name: entry.name.as_ptr() as usize,
                has_getter: entry.getter.is_some(),
                has_setter: entry.setter.is_some(),
                attributes: entry.attributes.bits(),
            })
            .collect();
        let buffer = Arc::new(layouts.encode_static_values(&records));
        debug!(entries = records.len(), "Froze static value table");
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

    pub fn contains(&self, name: &str) -> bool {
        self.state
            .read()
            .entries
            .iter()
            .any(|e| e.name.as_bytes() == name.as_bytes())
    }

    pub fn names(&self) -> Vec<String> {
        self.state
            .read()
            .entries
            .iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect()
    }

    /// Hooks declared for `name`, or `None` if the table does not declare it
    pub(crate) fn lookup(
        &self,
        name: &str,
    ) -> Option<(Option<GetPropertyHook>, Option<SetPropertyHook>)> {
        self.state
            .read()
            .entries
            .iter()
            .find(|e| e.name.as_bytes() == name.as_bytes())
            .map(|e| (e.getter.clone(), e.setter.clone()))
    }

    /// Release entries, names and the frozen buffer
    pub fn dispose(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.frozen = None;
        state.disposed = true;
    }
}

impl fmt::Debug for StaticPropertyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPropertyTable")
            .field("names", &self.names())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}
