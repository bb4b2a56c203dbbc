//! Simulated engine for integration tests
//!
//! `MockEngine` implements the boundary and drives the trampolines the way
//! JavaScriptCore does: an intercepted operation is offered to every class
//! of the instance's chain whose serialized slot is filled, leaf first,
//! until one handles it.

#![allow(dead_code)]

use dashmap::DashMap;
use otter_jsclass::trampoline::*;
use otter_jsclass::{
    AccumulatorRef, Boundary, ClassDescriptor, ClassRef, ContextRef, HookKind, ObjectRef,
    RawBuffer, StringRef, ValueRef, install_boundary, layouts, make_instance,
};
use otter_jsclass_sys::{
    JSObjectCallAsConstructorCallback, JSObjectCallAsFunctionCallback, JSValueRef,
};
use std::ffi::{CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Once};

pub const CTX: ContextRef = ContextRef::from_addr(0xc0);

#[derive(Default)]
pub struct MockEngine {
    next_handle: AtomicUsize,
    strings: DashMap<String, StringRef>,
    string_values: DashMap<StringRef, String>,
    private: DashMap<ObjectRef, usize>,
    classes: DashMap<ClassRef, usize>,
    released: DashMap<ClassRef, ()>,
    function_objects: DashMap<(ObjectRef, String), ObjectRef>,
    adhoc_functions: DashMap<ObjectRef, JSObjectCallAsFunctionCallback>,
    adhoc_constructors: DashMap<ObjectRef, JSObjectCallAsConstructorCallback>,
    accumulators: DashMap<AccumulatorRef, Vec<String>>,
    errors: DashMap<ValueRef, String>,
    recycled: DashMap<ClassRef, ObjectRef>,
}

static ENGINE: LazyLock<Arc<MockEngine>> = LazyLock::new(|| Arc::new(MockEngine::new()));
static INSTALL: Once = Once::new();

/// The engine installed as this test binary's boundary
pub fn engine() -> &'static MockEngine {
    INSTALL.call_once(|| {
        let engine: Arc<dyn Boundary> = ENGINE.clone();
        install_boundary(engine).unwrap();
    });
    &ENGINE
}

/// A value handle distinct from every engine-issued handle
pub fn value(n: usize) -> ValueRef {
    ValueRef::from_addr(0x7000_0000 + n * 0x10)
}

impl MockEngine {
    fn new() -> Self {
        Self {
            next_handle: AtomicUsize::new(0x1000),
            ..Default::default()
        }
    }

    fn handle(&self) -> usize {
        self.next_handle.fetch_add(0x10, Ordering::Relaxed)
    }

    pub fn fresh_object(&self) -> ObjectRef {
        ObjectRef::from_addr(self.handle())
    }

    pub fn string(&self, s: &str) -> StringRef {
        *self.strings.entry(s.to_string()).or_insert_with(|| {
            let string = StringRef::from_addr(self.handle());
            self.string_values.insert(string, s.to_string());
            string
        })
    }

    fn slot(&self, class: &ClassDescriptor, kind: HookKind) -> bool {
        let layout = &layouts().unwrap().class;
        // Disposed classes keep the definition their instances were made from
        let definition = match class.definition() {
            Some(definition) => definition,
            None => class.serialize().unwrap(),
        };
        definition.get_word(layout.hook(kind)) != 0
    }

    /// Hand `object`'s address to the next instance of `class`, as a
    /// collector does once the old object is gone
    pub fn reuse_for(&self, class: ClassRef, object: ObjectRef) {
        self.recycled.insert(class, object);
    }

    fn offered(&self, leaf: &Arc<ClassDescriptor>, kind: HookKind) -> Vec<Arc<ClassDescriptor>> {
        leaf.ancestors().filter(|c| self.slot(c, kind)).collect()
    }

    /// Create an instance and run initialization, root class first
    pub fn instantiate(&self, leaf: &Arc<ClassDescriptor>) -> ObjectRef {
        let object = make_instance(CTX, leaf).unwrap();
        for _ in self.offered(leaf, HookKind::Initialize).iter().rev() {
            // SAFETY: the mock hands out plain handles; trampolines never dereference them
            unsafe { initialize_trampoline(CTX.as_raw(), object.as_raw()) };
        }
        object
    }

    pub fn finalize(&self, leaf: &Arc<ClassDescriptor>, object: ObjectRef) {
        for _ in self.offered(leaf, HookKind::Finalize) {
            // SAFETY: as above
            unsafe { finalize_trampoline(object.as_raw()) };
        }
    }

    pub fn has_property(&self, leaf: &Arc<ClassDescriptor>, object: ObjectRef, name: &str) -> bool {
        let name = self.string(name);
        self.offered(leaf, HookKind::HasProperty).iter().any(|_| {
            // SAFETY: as above
            unsafe { has_property_trampoline(CTX.as_raw(), object.as_raw(), name.as_raw()) }
        })
    }

    /// `Ok(None)` when no class produced a value
    pub fn get_property(
        &self,
        leaf: &Arc<ClassDescriptor>,
        object: ObjectRef,
        name: &str,
    ) -> Result<Option<ValueRef>, ValueRef> {
        let name = self.string(name);
        for _ in self.offered(leaf, HookKind::GetProperty) {
            let mut exception: JSValueRef = ptr::null_mut();
            // SAFETY: as above
            let result = ValueRef::from_raw(unsafe {
                get_property_trampoline(CTX.as_raw(), object.as_raw(), name.as_raw(), &mut exception)
            });
            if !exception.is_null() {
                return Err(ValueRef::from_raw(exception));
            }
            if !result.is_null() {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    pub fn set_property(
        &self,
        leaf: &Arc<ClassDescriptor>,
        object: ObjectRef,
        name: &str,
        value: ValueRef,
    ) -> Result<bool, ValueRef> {
        let name = self.string(name);
        for _ in self.offered(leaf, HookKind::SetProperty) {
            let mut exception: JSValueRef = ptr::null_mut();
            // SAFETY: as above
            let handled = unsafe {
                set_property_trampoline(
                    CTX.as_raw(),
                    object.as_raw(),
                    name.as_raw(),
                    value.as_raw(),
                    &mut exception,
                )
            };
            if !exception.is_null() {
                return Err(ValueRef::from_raw(exception));
            }
            if handled {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn property_names(&self, leaf: &Arc<ClassDescriptor>, object: ObjectRef) -> Vec<String> {
        let accumulator = AccumulatorRef::from_addr(self.handle());
        self.accumulators.insert(accumulator, Vec::new());
        for _ in self.offered(leaf, HookKind::GetPropertyNames) {
            // SAFETY: as above
            unsafe {
                get_property_names_trampoline(CTX.as_raw(), object.as_raw(), accumulator.as_raw())
            };
        }
        self.accumulators
            .remove(&accumulator)
            .map(|(_, names)| names)
            .unwrap_or_default()
    }

    /// Construct through the first class in the chain that fills the slot
    pub fn construct(
        &self,
        leaf: &Arc<ClassDescriptor>,
        constructor: ObjectRef,
        args: &[ValueRef],
    ) -> Result<ObjectRef, ValueRef> {
        assert!(
            !self.offered(leaf, HookKind::CallAsConstructor).is_empty(),
            "{} is not a constructor",
            leaf.name()
        );
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: as above; ValueRef is a transparent pointer-sized handle
        let result = unsafe {
            call_as_constructor_trampoline(
                CTX.as_raw(),
                constructor.as_raw(),
                args.len(),
                args.as_ptr().cast(),
                &mut exception,
            )
        };
        match exception.is_null() {
            true => Ok(ObjectRef::from_raw(result)),
            false => Err(ValueRef::from_raw(exception)),
        }
    }

    /// The function object the engine exposes for a static function
    pub fn static_function_object(&self, instance: ObjectRef, name: &str) -> ObjectRef {
        *self
            .function_objects
            .entry((instance, name.to_string()))
            .or_insert_with(|| ObjectRef::from_addr(self.handle()))
    }

    pub fn call_static_function(
        &self,
        instance: ObjectRef,
        name: &str,
        args: &[ValueRef],
    ) -> Result<ValueRef, ValueRef> {
        let function = self.static_function_object(instance, name);
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: as above
        let result = unsafe {
            static_function_trampoline(
                CTX.as_raw(),
                function.as_raw(),
                instance.as_raw(),
                args.len(),
                args.as_ptr().cast(),
                &mut exception,
            )
        };
        match exception.is_null() {
            true => Ok(ValueRef::from_raw(result)),
            false => Err(ValueRef::from_raw(exception)),
        }
    }

    pub fn get_static_value(&self, object: ObjectRef, name: &str) -> Result<ValueRef, ValueRef> {
        let name = self.string(name);
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: as above
        let result = unsafe {
            static_get_trampoline(CTX.as_raw(), object.as_raw(), name.as_raw(), &mut exception)
        };
        match exception.is_null() {
            true => Ok(ValueRef::from_raw(result)),
            false => Err(ValueRef::from_raw(exception)),
        }
    }

    pub fn call_adhoc_function(
        &self,
        function: ObjectRef,
        args: &[ValueRef],
    ) -> Result<ValueRef, ValueRef> {
        let callback = self
            .adhoc_functions
            .get(&function)
            .and_then(|entry| *entry)
            .expect("not an ad hoc function");
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: as above
        let result = unsafe {
            callback(
                CTX.as_raw(),
                function.as_raw(),
                ptr::null_mut(),
                args.len(),
                args.as_ptr().cast(),
                &mut exception,
            )
        };
        match exception.is_null() {
            true => Ok(ValueRef::from_raw(result)),
            false => Err(ValueRef::from_raw(exception)),
        }
    }

    pub fn call_adhoc_constructor(
        &self,
        constructor: ObjectRef,
        args: &[ValueRef],
    ) -> Result<ObjectRef, ValueRef> {
        let callback = self
            .adhoc_constructors
            .get(&constructor)
            .and_then(|entry| *entry)
            .expect("not an ad hoc constructor");
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: as above
        let result = unsafe {
            callback(
                CTX.as_raw(),
                constructor.as_raw(),
                args.len(),
                args.as_ptr().cast(),
                &mut exception,
            )
        };
        match exception.is_null() {
            true => Ok(ObjectRef::from_raw(result)),
            false => Err(ValueRef::from_raw(exception)),
        }
    }

    pub fn is_released(&self, class: ClassRef) -> bool {
        self.released.contains_key(&class)
    }

    pub fn error_message(&self, error: ValueRef) -> Option<String> {
        self.errors.get(&error).map(|message| message.clone())
    }
}

impl Boundary for MockEngine {
    fn create_class(&self, definition: &RawBuffer) -> Option<ClassRef> {
        let class = ClassRef::from_addr(self.handle());
        self.classes.insert(class, definition.as_ptr() as usize);
        Some(class)
    }

    fn release_class(&self, class: ClassRef) {
        self.released.insert(class, ());
    }

    fn make_object(&self, _ctx: ContextRef, class: ClassRef, private: usize) -> ObjectRef {
        let object = self
            .recycled
            .remove(&class)
            .map_or_else(|| self.fresh_object(), |(_, object)| object);
        self.private.insert(object, private);
        object
    }

    fn make_function(
        &self,
        _ctx: ContextRef,
        _name: &CStr,
        callback: JSObjectCallAsFunctionCallback,
    ) -> ObjectRef {
        let function = self.fresh_object();
        self.adhoc_functions.insert(function, callback);
        function
    }

    fn make_constructor(
        &self,
        _ctx: ContextRef,
        _class: Option<ClassRef>,
        callback: JSObjectCallAsConstructorCallback,
    ) -> ObjectRef {
        let constructor = self.fresh_object();
        self.adhoc_constructors.insert(constructor, callback);
        constructor
    }

    fn private_data(&self, object: ObjectRef) -> usize {
        self.private.get(&object).map_or(0, |data| *data)
    }

    fn set_private_data(&self, object: ObjectRef, data: usize) -> bool {
        self.private.insert(object, data);
        true
    }

    fn string_to_rust(&self, string: StringRef) -> String {
        self.string_values
            .get(&string)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn add_property_name(&self, accumulator: AccumulatorRef, name: &str) {
        if let Some(mut names) = self.accumulators.get_mut(&accumulator) {
            names.push(name.to_string());
        }
    }

    fn static_function_handles(
        &self,
        _ctx: ContextRef,
        instance: ObjectRef,
        names: &[CString],
    ) -> Vec<Option<ObjectRef>> {
        names
            .iter()
            .map(|name| {
                let name = name.to_string_lossy();
                Some(self.static_function_object(instance, &name))
            })
            .collect()
    }

    fn make_error(&self, _ctx: ContextRef, message: &str) -> ValueRef {
        let error = ValueRef::from_addr(self.handle());
        self.errors.insert(error, message.to_string());
        error
    }
}
