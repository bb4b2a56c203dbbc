//! Raw handles exchanged with the engine
//!
//! Every engine reference crosses the boundary as a plain address. The
//! newtypes below keep those addresses `Send + Sync` so they can key the
//! process-wide maps, while still converting losslessly to and from the raw
//! `otter-jsclass-sys` pointer aliases.

use otter_jsclass_sys::JSValueRef;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(usize);

        impl $name {
            pub const NULL: Self = Self(0);

            pub const fn from_addr(addr: usize) -> Self {
                Self(addr)
            }

            pub fn from_raw(raw: *mut c_void) -> Self {
                Self(raw as usize)
            }

            pub fn as_raw(self) -> *mut c_void {
                self.0 as *mut c_void
            }

            pub const fn addr(self) -> usize {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

raw_handle!(
    /// An execution context (`JSContextRef`)
    ContextRef
);
raw_handle!(
    /// An object owned by the engine (`JSObjectRef`)
    ObjectRef
);
raw_handle!(
    /// Any engine value (`JSValueRef`)
    ValueRef
);
raw_handle!(
    /// An engine string (`JSStringRef`)
    StringRef
);
raw_handle!(
    /// A class created by the engine from a serialized definition (`JSClassRef`)
    ClassRef
);
raw_handle!(
    /// Property name accumulator passed to `getPropertyNames` (`JSPropertyNameAccumulatorRef`)
    AccumulatorRef
);

impl From<ObjectRef> for ValueRef {
    fn from(object: ObjectRef) -> Self {
        Self(object.0)
    }
}

/// Process-unique identity of a [`ClassDescriptor`](crate::ClassDescriptor).
///
/// Instances store their leaf class id as private data, so ids start at 1
/// and 0 never names a class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

impl ClassId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Recover an id from instance private data
    pub fn from_private(data: usize) -> Option<Self> {
        (data != 0).then_some(Self(data as u64))
    }

    /// Value stored as instance private data
    pub fn as_private(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// The exception out-parameter threaded through every hook invocation.
///
/// A null slot means the engine did not ask for exception reporting; writes
/// into it are dropped.
pub struct ExceptionSlot<'a> {
    raw: *mut JSValueRef,
    _slot: PhantomData<&'a mut JSValueRef>,
}

impl<'a> ExceptionSlot<'a> {
    /// Wrap a slot owned by the caller
    pub fn new(slot: &'a mut JSValueRef) -> Self {
        Self {
            raw: slot,
            _slot: PhantomData,
        }
    }

    /// A slot that discards exceptions
    pub fn none() -> Self {
        Self {
            raw: std::ptr::null_mut(),
            _slot: PhantomData,
        }
    }

    /// Wrap the raw out-parameter received from the engine
    ///
    /// # Safety
    /// `raw` must be null or valid for writes for the lifetime `'a`.
    pub unsafe fn from_raw(raw: *mut JSValueRef) -> Self {
        Self {
            raw,
            _slot: PhantomData,
        }
    }

    /// Store an exception value for the engine to raise
    pub fn set(&mut self, value: ValueRef) {
        if !self.raw.is_null() {
            // SAFETY: non-null slots are valid for writes per constructor contract
            unsafe { *self.raw = value.as_raw() };
        }
    }

    /// Currently stored exception, if any
    pub fn get(&self) -> Option<ValueRef> {
        if self.raw.is_null() {
            return None;
        }
        // SAFETY: non-null slots are valid for reads per constructor contract
        let value = ValueRef::from_raw(unsafe { *self.raw });
        (!value.is_null()).then_some(value)
    }
}
