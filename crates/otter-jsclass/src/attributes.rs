//! Attribute flags carried into serialized definitions

use otter_jsclass_sys::{
    JSClassAttributes, JSPropertyAttributes, K_JS_CLASS_ATTRIBUTE_NO_AUTOMATIC_PROTOTYPE,
    K_JS_CLASS_ATTRIBUTE_NONE, K_JS_PROPERTY_ATTRIBUTE_DONT_DELETE,
    K_JS_PROPERTY_ATTRIBUTE_DONT_ENUM, K_JS_PROPERTY_ATTRIBUTE_NONE,
    K_JS_PROPERTY_ATTRIBUTE_READ_ONLY,
};
use std::ops::BitOr;

/// Flags for a static value or static function entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PropertyAttributes(JSPropertyAttributes);

impl PropertyAttributes {
    pub const NONE: Self = Self(K_JS_PROPERTY_ATTRIBUTE_NONE);
    pub const READ_ONLY: Self = Self(K_JS_PROPERTY_ATTRIBUTE_READ_ONLY);
    pub const DONT_ENUM: Self = Self(K_JS_PROPERTY_ATTRIBUTE_DONT_ENUM);
    pub const DONT_DELETE: Self = Self(K_JS_PROPERTY_ATTRIBUTE_DONT_DELETE);

    pub const fn bits(self) -> JSPropertyAttributes {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropertyAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags for a whole class definition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ClassAttributes(JSClassAttributes);

impl ClassAttributes {
    pub const NONE: Self = Self(K_JS_CLASS_ATTRIBUTE_NONE);
    pub const NO_AUTOMATIC_PROTOTYPE: Self = Self(K_JS_CLASS_ATTRIBUTE_NO_AUTOMATIC_PROTOTYPE);

    pub const fn bits(self) -> JSClassAttributes {
        self.0
    }
}

impl BitOr for ClassAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
