//! Engine entry points
//!
//! Every serialized definition points at the same fixed set of `extern "C"`
//! functions. Each one recovers the instance's leaf class from its private
//! data, runs dispatch, and translates the outcome back into what the
//! engine expects: a value or null, a flag, or an exception in the
//! out-parameter.
//!
//! Host panics never cross into the engine. They are caught here and
//! raised as script errors. A call the class definitions cannot account for
//! means the engine and the host disagree about what was registered; that
//! is logged and the process aborts.

use crate::adhoc::registry;
use crate::boundary::{Boundary, boundary};
use crate::class::ClassDescriptor;
use crate::dispatch::{self, Resolution};
use crate::error::{JsClassError, JsClassResult};
use crate::handle::{
    AccumulatorRef, ClassId, ContextRef, ExceptionSlot, ObjectRef, StringRef, ValueRef,
};
use crate::hooks::{HookKind, JsType, PropertyNames};
use crate::layout::{ClassTemplates, Trampolines};
use crate::lifecycle;
use crate::memo::memo;
use otter_jsclass_sys::{
    JSClassDefinition, JSContextRef, JSObjectRef, JSPropertyNameAccumulatorRef, JSStaticFunction,
    JSStaticValue, JSStringRef, JSType, JSValueRef,
};
use std::any::Any;
use std::mem::{MaybeUninit, size_of};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::addr_of_mut;
use std::sync::Arc;
use tracing::{error, trace, warn};

fn protocol_violation(what: &str, err: JsClassError) -> ! {
    error!(operation = what, "Protocol violation: {}", err);
    std::process::abort()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Leaf class of `object`, from the id stored in its private data
fn leaf_class(boundary: &dyn Boundary, object: ObjectRef) -> Option<Arc<ClassDescriptor>> {
    if object.is_null() {
        return None;
    }
    let id = ClassId::from_private(boundary.private_data(object))?;
    let class = ClassDescriptor::lookup(id);
    if class.is_none() {
        warn!(?object, %id, "Instance belongs to a disposed class");
    }
    class
}

/// Run `body` on behalf of the engine and settle its outcome.
///
/// Returns the handled value, or `None` when the operation was not handled,
/// threw, or panicked.
fn guarded<T>(
    ctx: ContextRef,
    exception: &mut ExceptionSlot<'_>,
    kind: HookKind,
    instance: ObjectRef,
    body: impl FnOnce(&'static dyn Boundary) -> JsClassResult<Resolution<T>>,
) -> Option<T> {
    let boundary = match boundary() {
        Ok(boundary) => boundary,
        Err(e) => {
            error!(operation = %kind, "Cannot dispatch: {}", e);
            return None;
        }
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| body(boundary)));

    // Finalization clears private data before it purges the memo; an entry
    // pinned after that purge is dropped here.
    let finalized = || boundary.private_data(instance) == 0;
    if kind.memo_slot().is_some() && !instance.is_null() && finalized() {
        memo().purge_instance(instance);
    }

    match outcome {
        Ok(Ok(Resolution::Handled(value))) => Some(value),
        Ok(Ok(Resolution::NotHandled)) => None,
        Ok(Ok(Resolution::Threw(value))) => {
            exception.set(value);
            None
        }
        Ok(Err(e)) if e.is_protocol_violation() => protocol_violation(kind.name(), e),
        Ok(Err(e)) => {
            error!(operation = %kind, ?instance, "Dispatch failed: {}", e);
            None
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(operation = %kind, ?instance, "Host hook panicked: {}", message);
            memo().clear(kind, instance);
            exception.set(boundary.make_error(ctx, &format!("{kind} hook panicked: {message}")));
            None
        }
    }
}

/// # Safety
/// `arguments` must point to `count` values when `count` is non-zero.
unsafe fn arguments<'a>(count: usize, arguments: *const JSValueRef) -> &'a [ValueRef] {
    if count == 0 || arguments.is_null() {
        return &[];
    }
    // SAFETY: ValueRef is a transparent pointer-sized wrapper and the engine
    // passes `count` contiguous values
    unsafe { std::slice::from_raw_parts(arguments.cast::<ValueRef>(), count) }
}

pub unsafe extern "C" fn initialize_trampoline(ctx: JSContextRef, object: JSObjectRef) {
    let ctx = ContextRef::from_raw(ctx);
    let object = ObjectRef::from_raw(object);
    guarded(
        ctx,
        &mut ExceptionSlot::none(),
        HookKind::Initialize,
        object,
        |boundary| {
            if let Some(leaf) = leaf_class(boundary, object) {
                lifecycle::initialize(ctx, &leaf, object);
            }
            Ok(Resolution::Handled(()))
        },
    );
}

pub unsafe extern "C" fn finalize_trampoline(object: JSObjectRef) {
    let object = ObjectRef::from_raw(object);
    guarded(
        ContextRef::NULL,
        &mut ExceptionSlot::none(),
        HookKind::Finalize,
        object,
        |boundary| {
            // The engine finalizes once per class in the chain; the first
            // call takes the private data and does all the work.
            let Some(id) = ClassId::from_private(boundary.private_data(object)) else {
                trace!(?object, "Instance already finalized");
                return Ok(Resolution::NotHandled);
            };
            boundary.set_private_data(object, 0);
            match ClassDescriptor::lookup(id) {
                Some(leaf) => lifecycle::finalize(&leaf, object),
                None => {
                    warn!(?object, %id, "Finalizing instance of a disposed class");
                    lifecycle::forget_instance(object);
                }
            }
            Ok(Resolution::Handled(()))
        },
    );
}

pub unsafe extern "C" fn has_property_trampoline(
    ctx: JSContextRef,
    object: JSObjectRef,
    property_name: JSStringRef,
) -> bool {
    let ctx = ContextRef::from_raw(ctx);
    let object = ObjectRef::from_raw(object);
    guarded(
        ctx,
        &mut ExceptionSlot::none(),
        HookKind::HasProperty,
        object,
        |boundary| {
            let Some(leaf) = leaf_class(boundary, object) else {
                return Ok(Resolution::NotHandled);
            };
            let name = boundary.string_to_rust(StringRef::from_raw(property_name));
            Ok(match dispatch::has_property(ctx, &leaf, object, &name) {
                true => Resolution::Handled(()),
                false => Resolution::NotHandled,
            })
        },
    )
    .is_some()
}

pub unsafe extern "C" fn get_property_trampoline(
    ctx: JSContextRef,
    object: JSObjectRef,
    property_name: JSStringRef,
    exception: *mut JSValueRef,
) -> JSValueRef {
    let ctx = ContextRef::from_raw(ctx);
    let object = ObjectRef::from_raw(object);
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::GetProperty, object, |boundary| {
        let Some(leaf) = leaf_class(boundary, object) else {
            return Ok(Resolution::NotHandled);
        };
        let name = boundary.string_to_rust(StringRef::from_raw(property_name));
        Ok(dispatch::get_property(ctx, &leaf, object, &name))
    })
    .unwrap_or_default()
    .as_raw()
}

pub unsafe extern "C" fn set_property_trampoline(
    ctx: JSContextRef,
    object: JSObjectRef,
    property_name: JSStringRef,
    value: JSValueRef,
    exception: *mut JSValueRef,
) -> bool {
    let ctx = ContextRef::from_raw(ctx);
    let object = ObjectRef::from_raw(object);
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::SetProperty, object, |boundary| {
        let Some(leaf) = leaf_class(boundary, object) else {
            return Ok(Resolution::NotHandled);
        };
        let name = boundary.string_to_rust(StringRef::from_raw(property_name));
        Ok(dispatch::set_property(
            ctx,
            &leaf,
            object,
            &name,
            ValueRef::from_raw(value),
        ))
    })
    .is_some()
}

pub unsafe extern "C" fn delete_property_trampoline(
    ctx: JSContextRef,
    object: JSObjectRef,
    property_name: JSStringRef,
    exception: *mut JSValueRef,
) -> bool {
    let ctx = ContextRef::from_raw(ctx);
    let object = ObjectRef::from_raw(object);
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::DeleteProperty, object, |boundary| {
        let Some(leaf) = leaf_class(boundary, object) else {
            return Ok(Resolution::NotHandled);
        };
        let name = boundary.string_to_rust(StringRef::from_raw(property_name));
        Ok(dispatch::delete_property(ctx, &leaf, object, &name))
    })
    .is_some()
}

pub unsafe extern "C" fn get_property_names_trampoline(
    ctx: JSContextRef,
    object: JSObjectRef,
    property_names: JSPropertyNameAccumulatorRef,
) {
    let ctx = ContextRef::from_raw(ctx);
    let object = ObjectRef::from_raw(object);
    let accumulator = AccumulatorRef::from_raw(property_names);
    guarded(
        ctx,
        &mut ExceptionSlot::none(),
        HookKind::GetPropertyNames,
        object,
        |boundary| {
            let Some(leaf) = leaf_class(boundary, object) else {
                return Ok(Resolution::NotHandled);
            };
            let mut names = PropertyNames::new();
            dispatch::get_property_names(ctx, &leaf, object, &mut names);
            for name in names.iter() {
                boundary.add_property_name(accumulator, name);
            }
            Ok(Resolution::Handled(()))
        },
    );
}

pub unsafe extern "C" fn call_as_function_trampoline(
    ctx: JSContextRef,
    function: JSObjectRef,
    this_object: JSObjectRef,
    argument_count: usize,
    argument_values: *const JSValueRef,
    exception: *mut JSValueRef,
) -> JSValueRef {
    let ctx = ContextRef::from_raw(ctx);
    let function = ObjectRef::from_raw(function);
    let this = ObjectRef::from_raw(this_object);
    // SAFETY: the engine passes `argument_count` values
    let args = unsafe { arguments(argument_count, argument_values) };
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::CallAsFunction, function, |boundary| {
        let leaf = leaf_class(boundary, function).ok_or(JsClassError::UnregisteredCallback {
            kind: "callAsFunction",
            handle: function,
        })?;
        dispatch::call_as_function(ctx, &leaf, function, this, args)
    })
    .unwrap_or_default()
    .as_raw()
}

pub unsafe extern "C" fn call_as_constructor_trampoline(
    ctx: JSContextRef,
    constructor: JSObjectRef,
    argument_count: usize,
    argument_values: *const JSValueRef,
    exception: *mut JSValueRef,
) -> JSObjectRef {
    let ctx = ContextRef::from_raw(ctx);
    let constructor = ObjectRef::from_raw(constructor);
    // SAFETY: the engine passes `argument_count` values
    let args = unsafe { arguments(argument_count, argument_values) };
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::CallAsConstructor, constructor, |boundary| {
        let leaf = leaf_class(boundary, constructor).ok_or(JsClassError::UnregisteredCallback {
            kind: "callAsConstructor",
            handle: constructor,
        })?;
        dispatch::call_as_constructor(ctx, &leaf, constructor, args)
    })
    .unwrap_or_default()
    .as_raw()
}

pub unsafe extern "C" fn has_instance_trampoline(
    ctx: JSContextRef,
    constructor: JSObjectRef,
    possible_instance: JSValueRef,
    exception: *mut JSValueRef,
) -> bool {
    let ctx = ContextRef::from_raw(ctx);
    let constructor = ObjectRef::from_raw(constructor);
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::HasInstance, constructor, |boundary| {
        let Some(leaf) = leaf_class(boundary, constructor) else {
            return Ok(Resolution::NotHandled);
        };
        Ok(dispatch::has_instance(
            ctx,
            &leaf,
            constructor,
            ValueRef::from_raw(possible_instance),
        ))
    })
    .is_some()
}

pub unsafe extern "C" fn convert_to_type_trampoline(
    ctx: JSContextRef,
    object: JSObjectRef,
    type_: JSType,
    exception: *mut JSValueRef,
) -> JSValueRef {
    let ctx = ContextRef::from_raw(ctx);
    let object = ObjectRef::from_raw(object);
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::ConvertToType, object, |boundary| {
        let Some(leaf) = leaf_class(boundary, object) else {
            return Ok(Resolution::NotHandled);
        };
        let Some(target) = JsType::from_raw(type_) else {
            warn!(type_, "Conversion to unknown type");
            return Ok(Resolution::NotHandled);
        };
        Ok(dispatch::convert_to_type(ctx, &leaf, object, target))
    })
    .unwrap_or_default()
    .as_raw()
}

pub unsafe extern "C" fn static_get_trampoline(
    ctx: JSContextRef,
    object: JSObjectRef,
    property_name: JSStringRef,
    exception: *mut JSValueRef,
) -> JSValueRef {
    let ctx = ContextRef::from_raw(ctx);
    let object = ObjectRef::from_raw(object);
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::GetProperty, ObjectRef::NULL, |boundary| {
        let Some(leaf) = leaf_class(boundary, object) else {
            return Ok(Resolution::NotHandled);
        };
        let name = boundary.string_to_rust(StringRef::from_raw(property_name));
        dispatch::get_static_value(ctx, &leaf, object, &name)
    })
    .unwrap_or_default()
    .as_raw()
}

pub unsafe extern "C" fn static_set_trampoline(
    ctx: JSContextRef,
    object: JSObjectRef,
    property_name: JSStringRef,
    value: JSValueRef,
    exception: *mut JSValueRef,
) -> bool {
    let ctx = ContextRef::from_raw(ctx);
    let object = ObjectRef::from_raw(object);
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::SetProperty, ObjectRef::NULL, |boundary| {
        let Some(leaf) = leaf_class(boundary, object) else {
            return Ok(Resolution::NotHandled);
        };
        let name = boundary.string_to_rust(StringRef::from_raw(property_name));
        Ok(dispatch::set_static_value(
            ctx,
            &leaf,
            object,
            &name,
            ValueRef::from_raw(value),
        ))
    })
    .is_some()
}

pub unsafe extern "C" fn static_function_trampoline(
    ctx: JSContextRef,
    function: JSObjectRef,
    this_object: JSObjectRef,
    argument_count: usize,
    argument_values: *const JSValueRef,
    exception: *mut JSValueRef,
) -> JSValueRef {
    let ctx = ContextRef::from_raw(ctx);
    let function = ObjectRef::from_raw(function);
    let this = ObjectRef::from_raw(this_object);
    // SAFETY: the engine passes `argument_count` values
    let args = unsafe { arguments(argument_count, argument_values) };
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::CallAsFunction, this, |boundary| {
        let leaf = leaf_class(boundary, this).ok_or(JsClassError::UnregisteredCallback {
            kind: "static function",
            handle: function,
        })?;
        dispatch::call_static_function(ctx, &leaf, function, this, args, boundary)
    })
    .unwrap_or_default()
    .as_raw()
}

pub unsafe extern "C" fn adhoc_function_trampoline(
    ctx: JSContextRef,
    function: JSObjectRef,
    this_object: JSObjectRef,
    argument_count: usize,
    argument_values: *const JSValueRef,
    exception: *mut JSValueRef,
) -> JSValueRef {
    let ctx = ContextRef::from_raw(ctx);
    let function = ObjectRef::from_raw(function);
    let this = ObjectRef::from_raw(this_object);
    // SAFETY: the engine passes `argument_count` values
    let args = unsafe { arguments(argument_count, argument_values) };
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::CallAsFunction, function, |_| {
        registry().invoke_function(ctx, function, this, args)
    })
    .unwrap_or_default()
    .as_raw()
}

pub unsafe extern "C" fn adhoc_constructor_trampoline(
    ctx: JSContextRef,
    constructor: JSObjectRef,
    argument_count: usize,
    argument_values: *const JSValueRef,
    exception: *mut JSValueRef,
) -> JSObjectRef {
    let ctx = ContextRef::from_raw(ctx);
    let constructor = ObjectRef::from_raw(constructor);
    // SAFETY: the engine passes `argument_count` values
    let args = unsafe { arguments(argument_count, argument_values) };
    // SAFETY: the engine passes a null or writable exception slot
    let mut exception = unsafe { ExceptionSlot::from_raw(exception) };
    guarded(ctx, &mut exception, HookKind::CallAsConstructor, ObjectRef::NULL, |_| {
        registry().invoke_constructor(ctx, constructor, args)
    })
    .unwrap_or_default()
    .as_raw()
}

/// Addresses of the hook and static entry points
pub fn trampolines() -> Trampolines {
    Trampolines {
        hooks: [
            initialize_trampoline as usize,
            finalize_trampoline as usize,
            has_property_trampoline as usize,
            get_property_trampoline as usize,
            set_property_trampoline as usize,
            delete_property_trampoline as usize,
            get_property_names_trampoline as usize,
            call_as_function_trampoline as usize,
            call_as_constructor_trampoline as usize,
            has_instance_trampoline as usize,
            convert_to_type_trampoline as usize,
        ],
        static_get: static_get_trampoline as usize,
        static_set: static_set_trampoline as usize,
        static_function: static_function_trampoline as usize,
    }
}

/// Bytes of a record built from zeroed storage
///
/// # Safety
/// Every byte of `record` must be initialized.
unsafe fn record_bytes<T>(record: &MaybeUninit<T>) -> Vec<u8> {
    // SAFETY: guaranteed by the caller
    unsafe { std::slice::from_raw_parts(record.as_ptr().cast::<u8>(), size_of::<T>()) }.to_vec()
}

/// Template records with every callback slot pointing at its trampoline.
///
/// The records start zeroed and fields are written in place, so padding
/// bytes stay zero.
pub fn native_templates() -> ClassTemplates {
    let mut class = MaybeUninit::<JSClassDefinition>::zeroed();
    let definition = class.as_mut_ptr();
    // SAFETY: `definition` points to zeroed storage for a JSClassDefinition,
    // and each write targets a single field
    unsafe {
        addr_of_mut!((*definition).initialize).write(Some(initialize_trampoline));
        addr_of_mut!((*definition).finalize).write(Some(finalize_trampoline));
        addr_of_mut!((*definition).hasProperty).write(Some(has_property_trampoline));
        addr_of_mut!((*definition).getProperty).write(Some(get_property_trampoline));
        addr_of_mut!((*definition).setProperty).write(Some(set_property_trampoline));
        addr_of_mut!((*definition).deleteProperty).write(Some(delete_property_trampoline));
        addr_of_mut!((*definition).getPropertyNames).write(Some(get_property_names_trampoline));
        addr_of_mut!((*definition).callAsFunction).write(Some(call_as_function_trampoline));
        addr_of_mut!((*definition).callAsConstructor).write(Some(call_as_constructor_trampoline));
        addr_of_mut!((*definition).hasInstance).write(Some(has_instance_trampoline));
        addr_of_mut!((*definition).convertToType).write(Some(convert_to_type_trampoline));
    }

    let mut value = MaybeUninit::<JSStaticValue>::zeroed();
    let record = value.as_mut_ptr();
    // SAFETY: as above, for a JSStaticValue
    unsafe {
        addr_of_mut!((*record).getProperty).write(Some(static_get_trampoline));
        addr_of_mut!((*record).setProperty).write(Some(static_set_trampoline));
    }

    let mut function = MaybeUninit::<JSStaticFunction>::zeroed();
    let record = function.as_mut_ptr();
    // SAFETY: as above, for a JSStaticFunction
    unsafe {
        addr_of_mut!((*record).callAsFunction).write(Some(static_function_trampoline));
    }

    // SAFETY: all three records were zeroed before their fields were written
    unsafe {
        ClassTemplates {
            class_definition: record_bytes(&class),
            static_value: record_bytes(&value),
            static_function: record_bytes(&function),
            trampolines: trampolines(),
        }
    }
}
