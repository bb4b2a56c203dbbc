//! Host hook signatures and the per-class hook set

use crate::error::HookResult;
use crate::handle::{ContextRef, ObjectRef, ValueRef};
use otter_jsclass_sys::{
    JSType, K_JS_TYPE_BOOLEAN, K_JS_TYPE_NULL, K_JS_TYPE_NUMBER, K_JS_TYPE_OBJECT,
    K_JS_TYPE_STRING, K_JS_TYPE_SYMBOL, K_JS_TYPE_UNDEFINED,
};
use std::fmt;
use std::sync::Arc;

pub type InitializeHook = Arc<dyn Fn(ContextRef, ObjectRef) + Send + Sync>;
pub type FinalizeHook = Arc<dyn Fn(ObjectRef) + Send + Sync>;
pub type HasPropertyHook = Arc<dyn Fn(ContextRef, ObjectRef, &str) -> bool + Send + Sync>;
/// Returns `Ok(None)` to decline so an ancestor gets a chance.
pub type GetPropertyHook =
    Arc<dyn Fn(ContextRef, ObjectRef, &str) -> HookResult<Option<ValueRef>> + Send + Sync>;
/// Returns `Ok(false)` to decline.
pub type SetPropertyHook =
    Arc<dyn Fn(ContextRef, ObjectRef, &str, ValueRef) -> HookResult<bool> + Send + Sync>;
pub type DeletePropertyHook =
    Arc<dyn Fn(ContextRef, ObjectRef, &str) -> HookResult<bool> + Send + Sync>;
pub type GetPropertyNamesHook = Arc<dyn Fn(ContextRef, ObjectRef, &mut PropertyNames) + Send + Sync>;
/// `(ctx, function, this, arguments)`
pub type CallAsFunctionHook = Arc<
    dyn Fn(ContextRef, ObjectRef, ObjectRef, &[ValueRef]) -> HookResult<Option<ValueRef>>
        + Send
        + Sync,
>;
/// `(ctx, constructor, arguments)`
pub type CallAsConstructorHook =
    Arc<dyn Fn(ContextRef, ObjectRef, &[ValueRef]) -> HookResult<Option<ObjectRef>> + Send + Sync>;
/// `(ctx, constructor, possible_instance)`
pub type HasInstanceHook =
    Arc<dyn Fn(ContextRef, ObjectRef, ValueRef) -> HookResult<bool> + Send + Sync>;
pub type ConvertToTypeHook =
    Arc<dyn Fn(ContextRef, ObjectRef, JsType) -> HookResult<Option<ValueRef>> + Send + Sync>;

/// Wrap a closure as a static value getter
pub fn getter<F>(f: F) -> GetPropertyHook
where
    F: Fn(ContextRef, ObjectRef, &str) -> HookResult<Option<ValueRef>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a static value setter
pub fn setter<F>(f: F) -> SetPropertyHook
where
    F: Fn(ContextRef, ObjectRef, &str, ValueRef) -> HookResult<bool> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a static or ad hoc function callback
pub fn function<F>(f: F) -> CallAsFunctionHook
where
    F: Fn(ContextRef, ObjectRef, ObjectRef, &[ValueRef]) -> HookResult<Option<ValueRef>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as an ad hoc constructor callback
pub fn constructor<F>(f: F) -> CallAsConstructorHook
where
    F: Fn(ContextRef, ObjectRef, &[ValueRef]) -> HookResult<Option<ObjectRef>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// The eleven hook slots of a class definition, in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    Initialize,
    Finalize,
    HasProperty,
    GetProperty,
    SetProperty,
    DeleteProperty,
    GetPropertyNames,
    CallAsFunction,
    CallAsConstructor,
    HasInstance,
    ConvertToType,
}

impl HookKind {
    pub const COUNT: usize = 11;

    pub const ALL: [HookKind; Self::COUNT] = [
        Self::Initialize,
        Self::Finalize,
        Self::HasProperty,
        Self::GetProperty,
        Self::SetProperty,
        Self::DeleteProperty,
        Self::GetPropertyNames,
        Self::CallAsFunction,
        Self::CallAsConstructor,
        Self::HasInstance,
        Self::ConvertToType,
    ];

    /// Number of operations that keep a dispatch memo
    pub const MEMOIZED: usize = 8;

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Finalize => "finalize",
            Self::HasProperty => "hasProperty",
            Self::GetProperty => "getProperty",
            Self::SetProperty => "setProperty",
            Self::DeleteProperty => "deleteProperty",
            Self::GetPropertyNames => "getPropertyNames",
            Self::CallAsFunction => "callAsFunction",
            Self::CallAsConstructor => "callAsConstructor",
            Self::HasInstance => "hasInstance",
            Self::ConvertToType => "convertToType",
        }
    }

    /// Slot in the dispatch memo, for operations that use one.
    ///
    /// Lifecycle hooks run over the whole chain and `callAsFunction` walks
    /// to the first hook, so none of those remember progress.
    pub const fn memo_slot(self) -> Option<usize> {
        match self {
            Self::HasProperty => Some(0),
            Self::GetProperty => Some(1),
            Self::SetProperty => Some(2),
            Self::DeleteProperty => Some(3),
            Self::GetPropertyNames => Some(4),
            Self::CallAsConstructor => Some(5),
            Self::HasInstance => Some(6),
            Self::ConvertToType => Some(7),
            Self::Initialize | Self::Finalize | Self::CallAsFunction => None,
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Target type of a `convertToType` request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JsType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Symbol,
}

impl JsType {
    pub fn from_raw(raw: JSType) -> Option<Self> {
        match raw {
            K_JS_TYPE_UNDEFINED => Some(Self::Undefined),
            K_JS_TYPE_NULL => Some(Self::Null),
            K_JS_TYPE_BOOLEAN => Some(Self::Boolean),
            K_JS_TYPE_NUMBER => Some(Self::Number),
            K_JS_TYPE_STRING => Some(Self::String),
            K_JS_TYPE_OBJECT => Some(Self::Object),
            K_JS_TYPE_SYMBOL => Some(Self::Symbol),
            _ => None,
        }
    }

    pub fn to_raw(self) -> JSType {
        match self {
            Self::Undefined => K_JS_TYPE_UNDEFINED,
            Self::Null => K_JS_TYPE_NULL,
            Self::Boolean => K_JS_TYPE_BOOLEAN,
            Self::Number => K_JS_TYPE_NUMBER,
            Self::String => K_JS_TYPE_STRING,
            Self::Object => K_JS_TYPE_OBJECT,
            Self::Symbol => K_JS_TYPE_SYMBOL,
        }
    }
}

/// Names collected by `getPropertyNames` hooks.
///
/// Every class in the chain adds to the same collector; the trampoline
/// forwards the result to the engine's accumulator.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PropertyNames {
    names: Vec<String>,
}

impl PropertyNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>) {
        self.names.push(name.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.names
    }
}

/// A single hook, ready to be installed on a class.
#[derive(Clone)]
pub enum Hook {
    Initialize(InitializeHook),
    Finalize(FinalizeHook),
    HasProperty(HasPropertyHook),
    GetProperty(GetPropertyHook),
    SetProperty(SetPropertyHook),
    DeleteProperty(DeletePropertyHook),
    GetPropertyNames(GetPropertyNamesHook),
    CallAsFunction(CallAsFunctionHook),
    CallAsConstructor(CallAsConstructorHook),
    HasInstance(HasInstanceHook),
    ConvertToType(ConvertToTypeHook),
}

impl Hook {
    pub fn kind(&self) -> HookKind {
        match self {
            Self::Initialize(_) => HookKind::Initialize,
            Self::Finalize(_) => HookKind::Finalize,
            Self::HasProperty(_) => HookKind::HasProperty,
            Self::GetProperty(_) => HookKind::GetProperty,
            Self::SetProperty(_) => HookKind::SetProperty,
            Self::DeleteProperty(_) => HookKind::DeleteProperty,
            Self::GetPropertyNames(_) => HookKind::GetPropertyNames,
            Self::CallAsFunction(_) => HookKind::CallAsFunction,
            Self::CallAsConstructor(_) => HookKind::CallAsConstructor,
            Self::HasInstance(_) => HookKind::HasInstance,
            Self::ConvertToType(_) => HookKind::ConvertToType,
        }
    }

    pub fn initialize<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef) + Send + Sync + 'static,
    {
        Self::Initialize(Arc::new(f))
    }

    pub fn finalize<F>(f: F) -> Self
    where
        F: Fn(ObjectRef) + Send + Sync + 'static,
    {
        Self::Finalize(Arc::new(f))
    }

    pub fn has_property<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef, &str) -> bool + Send + Sync + 'static,
    {
        Self::HasProperty(Arc::new(f))
    }

    pub fn get_property<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef, &str) -> HookResult<Option<ValueRef>> + Send + Sync + 'static,
    {
        Self::GetProperty(getter(f))
    }

    pub fn set_property<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef, &str, ValueRef) -> HookResult<bool> + Send + Sync + 'static,
    {
        Self::SetProperty(setter(f))
    }

    pub fn delete_property<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef, &str) -> HookResult<bool> + Send + Sync + 'static,
    {
        Self::DeleteProperty(Arc::new(f))
    }

    pub fn get_property_names<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef, &mut PropertyNames) + Send + Sync + 'static,
    {
        Self::GetPropertyNames(Arc::new(f))
    }

    pub fn call_as_function<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef, ObjectRef, &[ValueRef]) -> HookResult<Option<ValueRef>>
            + Send
            + Sync
            + 'static,
    {
        Self::CallAsFunction(function(f))
    }

    pub fn call_as_constructor<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef, &[ValueRef]) -> HookResult<Option<ObjectRef>>
            + Send
            + Sync
            + 'static,
    {
        Self::CallAsConstructor(constructor(f))
    }

    pub fn has_instance<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef, ValueRef) -> HookResult<bool> + Send + Sync + 'static,
    {
        Self::HasInstance(Arc::new(f))
    }

    pub fn convert_to_type<F>(f: F) -> Self
    where
        F: Fn(ContextRef, ObjectRef, JsType) -> HookResult<Option<ValueRef>>
            + Send
            + Sync
            + 'static,
    {
        Self::ConvertToType(Arc::new(f))
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook::{}", self.kind())
    }
}

/// The optional hooks of one class.
#[derive(Clone, Default)]
pub struct ClassHooks {
    pub initialize: Option<InitializeHook>,
    pub finalize: Option<FinalizeHook>,
    pub has_property: Option<HasPropertyHook>,
    pub get_property: Option<GetPropertyHook>,
    pub set_property: Option<SetPropertyHook>,
    pub delete_property: Option<DeletePropertyHook>,
    pub get_property_names: Option<GetPropertyNamesHook>,
    pub call_as_function: Option<CallAsFunctionHook>,
    pub call_as_constructor: Option<CallAsConstructorHook>,
    pub has_instance: Option<HasInstanceHook>,
    pub convert_to_type: Option<ConvertToTypeHook>,
}

impl ClassHooks {
    pub fn set(&mut self, hook: Hook) {
        match hook {
            Hook::Initialize(h) => self.initialize = Some(h),
            Hook::Finalize(h) => self.finalize = Some(h),
            Hook::HasProperty(h) => self.has_property = Some(h),
            Hook::GetProperty(h) => self.get_property = Some(h),
            Hook::SetProperty(h) => self.set_property = Some(h),
            Hook::DeleteProperty(h) => self.delete_property = Some(h),
            Hook::GetPropertyNames(h) => self.get_property_names = Some(h),
            Hook::CallAsFunction(h) => self.call_as_function = Some(h),
            Hook::CallAsConstructor(h) => self.call_as_constructor = Some(h),
            Hook::HasInstance(h) => self.has_instance = Some(h),
            Hook::ConvertToType(h) => self.convert_to_type = Some(h),
        }
    }

    pub fn defines(&self, kind: HookKind) -> bool {
        match kind {
            HookKind::Initialize => self.initialize.is_some(),
            HookKind::Finalize => self.finalize.is_some(),
            HookKind::HasProperty => self.has_property.is_some(),
            HookKind::GetProperty => self.get_property.is_some(),
            HookKind::SetProperty => self.set_property.is_some(),
            HookKind::DeleteProperty => self.delete_property.is_some(),
            HookKind::GetPropertyNames => self.get_property_names.is_some(),
            HookKind::CallAsFunction => self.call_as_function.is_some(),
            HookKind::CallAsConstructor => self.call_as_constructor.is_some(),
            HookKind::HasInstance => self.has_instance.is_some(),
            HookKind::ConvertToType => self.convert_to_type.is_some(),
        }
    }
}

impl fmt::Debug for ClassHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let defined: Vec<_> = HookKind::ALL
            .iter()
            .filter(|kind| self.defines(**kind))
            .map(|kind| kind.name())
            .collect();
        f.debug_tuple("ClassHooks").field(&defined).finish()
    }
}
