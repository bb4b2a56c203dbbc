//! Test doubles for unit tests

use crate::boundary::{Boundary, install_boundary};
use crate::buffer::RawBuffer;
use crate::handle::{AccumulatorRef, ClassRef, ContextRef, ObjectRef, StringRef, ValueRef};
use dashmap::DashMap;
use otter_jsclass_sys::{JSObjectCallAsConstructorCallback, JSObjectCallAsFunctionCallback};
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

static NEXT_OBJECT: AtomicUsize = AtomicUsize::new(0x10_0000);

/// A fresh handle no other test uses
pub fn unique_object() -> ObjectRef {
    ObjectRef::from_addr(NEXT_OBJECT.fetch_add(0x10, Ordering::Relaxed))
}

static INSTALL: Once = Once::new();

/// Install a shared [`StubBoundary`] as the process boundary
pub fn install_stub() {
    INSTALL.call_once(|| install_boundary(Arc::new(StubBoundary::default())).unwrap());
}

/// Minimal engine: hands out fresh handles and answers static function
/// lookups with [`StubBoundary::function_handle`].
#[derive(Default)]
pub struct StubBoundary {
    private: DashMap<ObjectRef, usize>,
    handle_requests: AtomicUsize,
}

impl StubBoundary {
    /// Handle the stub reports for entry `index` bound on `instance`
    pub fn function_handle(&self, instance: ObjectRef, index: usize) -> ObjectRef {
        ObjectRef::from_addr((instance.addr() << 8) | (index + 1))
    }

    pub fn handle_requests(&self) -> usize {
        self.handle_requests.load(Ordering::SeqCst)
    }
}

impl Boundary for StubBoundary {
    fn create_class(&self, _definition: &RawBuffer) -> Option<ClassRef> {
        Some(ClassRef::from_addr(unique_object().addr()))
    }

    fn release_class(&self, _class: ClassRef) {}

    fn make_object(&self, _ctx: ContextRef, _class: ClassRef, private: usize) -> ObjectRef {
        let object = unique_object();
        self.private.insert(object, private);
        object
    }

    fn make_function(
        &self,
        _ctx: ContextRef,
        _name: &CStr,
        _callback: JSObjectCallAsFunctionCallback,
    ) -> ObjectRef {
        unique_object()
    }

    fn make_constructor(
        &self,
        _ctx: ContextRef,
        _class: Option<ClassRef>,
        _callback: JSObjectCallAsConstructorCallback,
    ) -> ObjectRef {
        unique_object()
    }

    fn private_data(&self, object: ObjectRef) -> usize {
        self.private.get(&object).map_or(0, |data| *data)
    }

    fn set_private_data(&self, object: ObjectRef, data: usize) -> bool {
        self.private.insert(object, data);
        true
    }

    fn string_to_rust(&self, _string: StringRef) -> String {
        String::new()
    }

    fn add_property_name(&self, _accumulator: AccumulatorRef, _name: &str) {}

    fn static_function_handles(
        &self,
        _ctx: ContextRef,
        instance: ObjectRef,
        names: &[CString],
    ) -> Vec<Option<ObjectRef>> {
        self.handle_requests.fetch_add(1, Ordering::SeqCst);
        (0..names.len())
            .map(|index| Some(self.function_handle(instance, index)))
            .collect()
    }

    fn make_error(&self, _ctx: ContextRef, _message: &str) -> ValueRef {
        ValueRef::from_addr(0xe0)
    }
}
