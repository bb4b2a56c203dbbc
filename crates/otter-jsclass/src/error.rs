//! Error types for otter-jsclass

use crate::handle::{ClassId, ObjectRef, ValueRef};
use thiserror::Error;

/// Errors raised while defining classes or dispatching hooks
#[derive(Error, Debug)]
pub enum JsClassError {
    /// A structural change was attempted after serialization
    #[error("{what} is frozen: it has already been serialized")]
    Frozen { what: String },

    /// A table already holds an entry with this name
    #[error("Duplicate entry name: {0}")]
    DuplicateName(String),

    /// Names cross the boundary as C strings and cannot contain NUL
    #[error("Invalid name {0:?}: contains an interior NUL byte")]
    InvalidName(String),

    /// Setting this parent would make the class its own ancestor
    #[error("Cyclic class hierarchy: {child} cannot inherit from {parent}")]
    CyclicHierarchy { child: String, parent: String },

    /// The class was disposed and can no longer be used
    #[error("Class {0} has been disposed")]
    Disposed(String),

    /// Field offsets could not be derived from the definition templates
    #[error("Layout discovery failed: {0}")]
    Layout(String),

    /// No engine boundary has been installed for this process
    #[error("No engine boundary installed")]
    BoundaryNotInstalled,

    /// An engine boundary is already installed for this process
    #[error("An engine boundary is already installed")]
    BoundaryAlreadyInstalled,

    /// A raw handle was invoked that no table or registry knows about
    #[error("Unregistered {kind} callback for handle {handle:?}")]
    UnregisteredCallback { kind: &'static str, handle: ObjectRef },

    /// No class in the chain defines the hook the engine invoked
    #[error("No {operation} hook found in the chain of {class}")]
    NoHookInChain {
        operation: &'static str,
        class: ClassId,
    },

    /// The engine asked for a static value no class in the chain declares
    #[error("Static value {name:?} is not declared in the chain of {class}")]
    StaticValueNotFound { name: String, class: ClassId },

    /// The engine refused to create a class from a serialized definition
    #[error("Failed to create class {0}")]
    ClassCreation(String),

    /// Invalid or late configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl JsClassError {
    pub fn frozen(what: impl Into<String>) -> Self {
        Self::Frozen { what: what.into() }
    }

    pub fn layout(message: impl Into<String>) -> Self {
        Self::Layout(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Protocol violations indicate the engine and the class definitions
    /// disagree. Trampolines abort the process when they see one.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnregisteredCallback { .. }
                | Self::NoHookInChain { .. }
                | Self::StaticValueNotFound { .. }
        )
    }
}

/// Result type alias for class operations
pub type JsClassResult<T> = Result<T, JsClassError>;

/// A script-visible exception raised by a host hook.
///
/// The wrapped value is handed to the engine through the exception slot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("script exception {0:?}")]
pub struct ScriptException(pub ValueRef);

impl ScriptException {
    pub fn value(self) -> ValueRef {
        self.0
    }
}

impl From<ValueRef> for ScriptException {
    fn from(value: ValueRef) -> Self {
        Self(value)
    }
}

/// What a host hook returns when it may throw
pub type HookResult<T> = Result<T, ScriptException>;
