// Raw engine handles are plain integers on the Rust side; the trampolines
// are the only code that dereferences engine pointers.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

//! Host-defined classes for JavaScriptCore.
//!
//! A host describes a class with a [`ClassDescriptor`]: a name, optional
//! parent, static value and function tables, and any of the eleven class
//! hooks. The first time an instance is needed the descriptor is serialized
//! into the engine's `JSClassDefinition` layout and turned into an engine
//! class. From then on it is frozen.
//!
//! Every serialized slot points at one shared trampoline per hook. The
//! engine offers an operation to each class of an instance's chain in
//! turn, and the trampolines use a per-instance memo to route every offer
//! to the right host hook.
//!
//! # Example
//!
//! ```ignore
//! use otter_jsclass::{ClassDescriptor, Hook, make_instance};
//!
//! let base = ClassDescriptor::builder("Base")
//!     .hook(Hook::get_property(|_, _, name| Ok((name == "kind").then(|| kind_value()))))
//!     .build()?;
//! let derived = ClassDescriptor::builder("Derived").parent(&base).build()?;
//! let object = make_instance(ctx, &derived)?;
//! ```
//!
//! # Engine boundary
//!
//! All engine calls go through a [`Boundary`] installed once per process
//! with [`install_boundary`]. With the `jsc` feature, [`jsc::JscBoundary`]
//! talks to JavaScriptCore directly.

mod adhoc;
mod attributes;
mod boundary;
mod buffer;
mod class;
mod config;
mod dispatch;
mod error;
mod handle;
mod hooks;
mod layout;
pub mod lifecycle;
mod memo;
mod objects;
mod static_functions;
mod static_values;
pub mod trampoline;

#[cfg(feature = "jsc")]
pub mod jsc;

#[cfg(test)]
mod testing;

pub use adhoc::{AdHocCallbackRegistry, registry};
pub use attributes::{ClassAttributes, PropertyAttributes};
pub use boundary::{Boundary, boundary, install_boundary, is_installed};
pub use buffer::{RawBuffer, WORD};
pub use class::{ClassBuilder, ClassDescriptor};
pub use config::{CONFIG_ENV, JsClassConfig, config, configure};
pub use dispatch::{
    Resolution, call_as_constructor, call_as_function, call_static_function, convert_to_type,
    delete_property, get_property, get_property_names, get_static_value, has_instance,
    has_property, set_property, set_static_value,
};
pub use error::{HookResult, JsClassError, JsClassResult, ScriptException};
pub use handle::{
    AccumulatorRef, ClassId, ClassRef, ContextRef, ExceptionSlot, ObjectRef, StringRef, ValueRef,
};
pub use hooks::{
    CallAsConstructorHook, CallAsFunctionHook, ClassHooks, ConvertToTypeHook, DeletePropertyHook,
    FinalizeHook, GetPropertyHook, GetPropertyNamesHook, HasInstanceHook, HasPropertyHook, Hook,
    HookKind, InitializeHook, JsType, PropertyNames, SetPropertyHook, constructor, function,
    getter, setter,
};
pub use layout::{
    ClassFields, ClassLayout, ClassTemplates, Layouts, StaticFunctionLayout, StaticFunctionRecord,
    StaticValueLayout, StaticValueRecord, Trampolines, layouts,
};
pub use memo::{DispatchMemo, memo};
pub use objects::{make_constructor, make_function, make_instance};
pub use static_functions::{FunctionBinding, StaticFunctionTable};
pub use static_values::StaticPropertyTable;
