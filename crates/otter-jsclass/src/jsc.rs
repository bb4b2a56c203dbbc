//! Boundary backed by the JavaScriptCore C API

use crate::boundary::Boundary;
use crate::buffer::RawBuffer;
use crate::handle::{AccumulatorRef, ClassRef, ContextRef, ObjectRef, StringRef, ValueRef};
use otter_jsclass_sys::*;
use std::ffi::{CStr, CString, c_char};
use std::ptr;

/// Owned JSStringRef, released on drop
struct JscString {
    raw: JSStringRef,
}

impl JscString {
    fn new(s: &CStr) -> Option<Self> {
        // SAFETY: s is a valid NUL-terminated string
        let raw = unsafe { JSStringCreateWithUTF8CString(s.as_ptr()) };
        (!raw.is_null()).then(|| Self { raw })
    }

    fn from_rust(s: &str) -> Option<Self> {
        // Interior NULs would truncate; cut at the first one instead
        let bytes = s.split('\0').next().unwrap_or_default();
        let c_str = CString::new(bytes).ok()?;
        Self::new(&c_str)
    }
}

impl Drop for JscString {
    fn drop(&mut self) {
        // SAFETY: self.raw was created by JSStringCreateWithUTF8CString
        unsafe { JSStringRelease(self.raw) };
    }
}

/// Convert JSStringRef to Rust String
///
/// # Safety
/// `string` must be a valid JSStringRef or null.
unsafe fn js_string_to_rust(string: JSStringRef) -> String {
    if string.is_null() {
        return String::new();
    }

    // SAFETY: string is valid per caller contract
    unsafe {
        let max_size = JSStringGetMaximumUTF8CStringSize(string);
        let mut buffer = vec![0u8; max_size];
        let actual_size = JSStringGetUTF8CString(string, buffer.as_mut_ptr() as *mut c_char, max_size);
        if actual_size > 0 {
            // actual_size includes the NUL terminator
            buffer.truncate(actual_size - 1);
            String::from_utf8_lossy(&buffer).into_owned()
        } else {
            String::new()
        }
    }
}

/// The JavaScriptCore engine boundary.
///
/// Handles passed to it must come from the engine; contexts must be alive
/// for the duration of each call.
#[derive(Debug, Default, Clone, Copy)]
pub struct JscBoundary;

impl JscBoundary {
    pub fn new() -> Self {
        Self
    }
}

impl Boundary for JscBoundary {
    fn create_class(&self, definition: &RawBuffer) -> Option<ClassRef> {
        // SAFETY: the buffer is an encoded JSClassDefinition and outlives the class
        let class = unsafe { JSClassCreate(definition.as_ptr().cast::<JSClassDefinition>()) };
        (!class.is_null()).then(|| ClassRef::from_raw(class))
    }

    fn release_class(&self, class: ClassRef) {
        // SAFETY: class came from JSClassCreate
        unsafe { JSClassRelease(class.as_raw()) };
    }

    fn make_object(&self, ctx: ContextRef, class: ClassRef, private: usize) -> ObjectRef {
        // SAFETY: ctx and class are live engine handles
        let object = unsafe { JSObjectMake(ctx.as_raw(), class.as_raw(), private as *mut _) };
        ObjectRef::from_raw(object)
    }

    fn make_function(
        &self,
        ctx: ContextRef,
        name: &CStr,
        callback: JSObjectCallAsFunctionCallback,
    ) -> ObjectRef {
        let name = JscString::new(name);
        let raw_name = name.as_ref().map_or(ptr::null_mut(), |n| n.raw);
        // SAFETY: ctx is live; a null name yields an anonymous function
        let function = unsafe { JSObjectMakeFunctionWithCallback(ctx.as_raw(), raw_name, callback) };
        ObjectRef::from_raw(function)
    }

    fn make_constructor(
        &self,
        ctx: ContextRef,
        class: Option<ClassRef>,
        callback: JSObjectCallAsConstructorCallback,
    ) -> ObjectRef {
        let class = class.map_or(ptr::null_mut(), ClassRef::as_raw);
        // SAFETY: ctx is live; a null class means the default object class
        let constructor = unsafe { JSObjectMakeConstructor(ctx.as_raw(), class, callback) };
        ObjectRef::from_raw(constructor)
    }

    fn private_data(&self, object: ObjectRef) -> usize {
        // SAFETY: object is a live engine object
        unsafe { JSObjectGetPrivate(object.as_raw()) as usize }
    }

    fn set_private_data(&self, object: ObjectRef, data: usize) -> bool {
        // SAFETY: object is a live engine object
        unsafe { JSObjectSetPrivate(object.as_raw(), data as *mut _) }
    }

    fn string_to_rust(&self, string: StringRef) -> String {
        // SAFETY: the engine hands out valid strings to callbacks
        unsafe { js_string_to_rust(string.as_raw()) }
    }

    fn add_property_name(&self, accumulator: AccumulatorRef, name: &str) {
        if let Some(name) = JscString::from_rust(name) {
            // SAFETY: accumulator is valid for the duration of getPropertyNames
            unsafe { JSPropertyNameAccumulatorAddName(accumulator.as_raw(), name.raw) };
        }
    }

    fn static_function_handles(
        &self,
        ctx: ContextRef,
        instance: ObjectRef,
        names: &[CString],
    ) -> Vec<Option<ObjectRef>> {
        names
            .iter()
            .map(|name| {
                let name = JscString::new(name)?;
                let mut exception: JSValueRef = ptr::null_mut();
                // SAFETY: ctx and instance are live; the exception slot is local
                let value = unsafe {
                    JSObjectGetProperty(ctx.as_raw(), instance.as_raw(), name.raw, &mut exception)
                };
                // SAFETY: value came from the engine in this context
                if value.is_null()
                    || !exception.is_null()
                    || unsafe { JSValueIsUndefined(ctx.as_raw(), value) }
                {
                    return None;
                }
                // SAFETY: as above
                let object = unsafe { JSValueToObject(ctx.as_raw(), value, ptr::null_mut()) };
                (!object.is_null()).then(|| ObjectRef::from_raw(object))
            })
            .collect()
    }

    fn make_error(&self, ctx: ContextRef, message: &str) -> ValueRef {
        let Some(message) = JscString::from_rust(message) else {
            return ValueRef::NULL;
        };
        // SAFETY: ctx is live and message is a valid string
        unsafe {
            let argument = JSValueMakeString(ctx.as_raw(), message.raw);
            let error = JSObjectMakeError(ctx.as_raw(), 1, &argument, ptr::null_mut());
            ValueRef::from_raw(error)
        }
    }
}
