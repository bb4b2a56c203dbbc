//! Field offset discovery and binary encoding of definitions
//!
//! The engine reads class definitions and static tables as raw structs. Rather
//! than trusting hardcoded offsets, the layouts are derived once per process
//! from template records whose hook slots hold known trampoline addresses:
//! every slot is found by scanning the template for its address, and the
//! remaining fields are placed relative to those slots.

use crate::buffer::{RawBuffer, WORD, read_word};
use crate::error::{JsClassError, JsClassResult};
use crate::hooks::HookKind;
use crate::trampoline;
use std::mem::size_of;
use std::sync::OnceLock;
use tracing::debug;

/// Addresses of the fixed entry points written into hook slots
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trampolines {
    pub hooks: [usize; HookKind::COUNT],
    pub static_get: usize,
    pub static_set: usize,
    pub static_function: usize,
}

impl Trampolines {
    pub fn hook(&self, kind: HookKind) -> usize {
        self.hooks[kind.index()]
    }
}

/// Template records from which the layouts are discovered.
///
/// Each template is an otherwise empty record whose callback slots hold the
/// matching trampoline address.
#[derive(Clone, Debug)]
pub struct ClassTemplates {
    pub class_definition: Vec<u8>,
    pub static_value: Vec<u8>,
    pub static_function: Vec<u8>,
    pub trampolines: Trampolines,
}

/// Offsets within a class definition record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassLayout {
    pub size: usize,
    pub version: usize,
    pub attributes: usize,
    pub class_name: usize,
    pub parent_class: usize,
    pub static_values: usize,
    pub static_functions: usize,
    pub hooks: [usize; HookKind::COUNT],
}

/// Offsets within one static value record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticValueLayout {
    pub size: usize,
    pub name: usize,
    pub get_property: usize,
    pub set_property: usize,
    pub attributes: usize,
}

/// Offsets within one static function record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticFunctionLayout {
    pub size: usize,
    pub name: usize,
    pub call_as_function: usize,
    pub attributes: usize,
}

/// Field values for one encoded class definition
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassFields {
    pub version: i32,
    pub attributes: u32,
    pub class_name: usize,
    pub parent_class: usize,
    pub static_values: usize,
    pub static_functions: usize,
    /// Which hook slots receive their trampoline
    pub slots: [bool; HookKind::COUNT],
}

#[derive(Clone, Copy, Debug)]
pub struct StaticValueRecord {
    pub name: usize,
    pub has_getter: bool,
    pub has_setter: bool,
    pub attributes: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct StaticFunctionRecord {
    pub name: usize,
    pub has_callback: bool,
    pub attributes: u32,
}

/// All discovered layouts together with the trampolines they encode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layouts {
    pub class: ClassLayout,
    pub static_value: StaticValueLayout,
    pub static_function: StaticFunctionLayout,
    pub trampolines: Trampolines,
}

static LAYOUTS: OnceLock<Result<Layouts, String>> = OnceLock::new();

/// Process-wide layouts, discovered on first use from this crate's own
/// trampolines.
pub fn layouts() -> JsClassResult<&'static Layouts> {
    LAYOUTS
        .get_or_init(|| {
            let templates = trampoline::native_templates();
            Layouts::discover(&templates).map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|message| JsClassError::layout(message.clone()))
}

/// Offset of the single pointer-aligned word equal to `address`
fn locate(template: &[u8], address: usize, what: &str) -> JsClassResult<usize> {
    if address == 0 {
        return Err(JsClassError::layout(format!("{what} trampoline is null")));
    }

    let mut hits = (0..template.len().saturating_sub(WORD - 1))
        .step_by(WORD)
        .filter(|offset| read_word(template, *offset) == address);

    let offset = hits
        .next()
        .ok_or_else(|| JsClassError::layout(format!("{what} trampoline not found in template")))?;
    if hits.next().is_some() {
        return Err(JsClassError::layout(format!(
            "{what} trampoline appears more than once in template"
        )));
    }
    Ok(offset)
}

fn expect_null(template: &[u8], offset: usize, what: &str) -> JsClassResult<()> {
    if read_word(template, offset) != 0 {
        return Err(JsClassError::layout(format!(
            "{what} slot at offset {offset} is not null in template"
        )));
    }
    Ok(())
}

impl ClassLayout {
    pub fn discover(template: &[u8], trampolines: &Trampolines) -> JsClassResult<Self> {
        let mut hooks = [0usize; HookKind::COUNT];
        for kind in HookKind::ALL {
            hooks[kind.index()] = locate(template, trampolines.hook(kind), kind.name())?;
        }

        for (pair, kinds) in hooks.windows(2).zip(HookKind::ALL.windows(2)) {
            if pair[1] != pair[0] + WORD {
                return Err(JsClassError::layout(format!(
                    "{} slot does not directly follow {}",
                    kinds[1], kinds[0]
                )));
            }
        }

        let initialize = hooks[HookKind::Initialize.index()];
        let class_name = initialize.checked_sub(4 * WORD).ok_or_else(|| {
            JsClassError::layout("no room for pointer fields before initialize")
        })?;
        let parent_class = class_name + WORD;
        let static_values = parent_class + WORD;
        let static_functions = static_values + WORD;

        let version = 0;
        let attributes = version + size_of::<i32>();
        if attributes + size_of::<u32>() > class_name {
            return Err(JsClassError::layout(
                "className overlaps version and attributes",
            ));
        }

        expect_null(template, class_name, "className")?;
        expect_null(template, parent_class, "parentClass")?;
        expect_null(template, static_values, "staticValues")?;
        expect_null(template, static_functions, "staticFunctions")?;

        Ok(Self {
            size: template.len(),
            version,
            attributes,
            class_name,
            parent_class,
            static_values,
            static_functions,
            hooks,
        })
    }

    pub fn hook(&self, kind: HookKind) -> usize {
        self.hooks[kind.index()]
    }
}

impl StaticValueLayout {
    pub fn discover(template: &[u8], getter: usize, setter: usize) -> JsClassResult<Self> {
        let get_property = locate(template, getter, "static getter")?;
        let set_property = locate(template, setter, "static setter")?;
        if set_property != get_property + WORD {
            return Err(JsClassError::layout(
                "static setter slot does not directly follow the getter",
            ));
        }
        let name = get_property
            .checked_sub(WORD)
            .ok_or_else(|| JsClassError::layout("no room for static value name"))?;
        expect_null(template, name, "static value name")?;

        let attributes = set_property + WORD;
        if attributes + size_of::<u32>() > template.len() {
            return Err(JsClassError::layout(
                "static value attributes fall outside the record",
            ));
        }

        Ok(Self {
            size: template.len(),
            name,
            get_property,
            set_property,
            attributes,
        })
    }
}

impl StaticFunctionLayout {
    pub fn discover(template: &[u8], callback: usize) -> JsClassResult<Self> {
        let call_as_function = locate(template, callback, "static function")?;
        let name = call_as_function
            .checked_sub(WORD)
            .ok_or_else(|| JsClassError::layout("no room for static function name"))?;
        expect_null(template, name, "static function name")?;

        let attributes = call_as_function + WORD;
        if attributes + size_of::<u32>() > template.len() {
            return Err(JsClassError::layout(
                "static function attributes fall outside the record",
            ));
        }

        Ok(Self {
            size: template.len(),
            name,
            call_as_function,
            attributes,
        })
    }
}

impl Layouts {
    pub fn discover(templates: &ClassTemplates) -> JsClassResult<Self> {
        let trampolines = templates.trampolines;
        let class = ClassLayout::discover(&templates.class_definition, &trampolines)?;
        let static_value = StaticValueLayout::discover(
            &templates.static_value,
            trampolines.static_get,
            trampolines.static_set,
        )?;
        let static_function =
            StaticFunctionLayout::discover(&templates.static_function, trampolines.static_function)?;

        debug!(
            class_size = class.size,
            initialize = class.hook(HookKind::Initialize),
            static_value_size = static_value.size,
            static_function_size = static_function.size,
            "Discovered class definition layout"
        );

        Ok(Self {
            class,
            static_value,
            static_function,
            trampolines,
        })
    }

    pub fn encode_class(&self, fields: &ClassFields) -> RawBuffer {
        let layout = &self.class;
        let mut buffer = RawBuffer::zeroed(layout.size);
        buffer.put_u32(layout.version, fields.version as u32);
        buffer.put_u32(layout.attributes, fields.attributes);
        buffer.put_word(layout.class_name, fields.class_name);
        buffer.put_word(layout.parent_class, fields.parent_class);
        buffer.put_word(layout.static_values, fields.static_values);
        buffer.put_word(layout.static_functions, fields.static_functions);
        for kind in HookKind::ALL {
            if fields.slots[kind.index()] {
                buffer.put_word(layout.hook(kind), self.trampolines.hook(kind));
            }
        }
        buffer
    }

    /// Encode the records followed by a zeroed sentinel record
    pub fn encode_static_values(&self, records: &[StaticValueRecord]) -> RawBuffer {
        let layout = &self.static_value;
        let mut buffer = RawBuffer::zeroed((records.len() + 1) * layout.size);
        for (i, record) in records.iter().enumerate() {
            let base = i * layout.size;
            buffer.put_word(base + layout.name, record.name);
            if record.has_getter {
                buffer.put_word(base + layout.get_property, self.trampolines.static_get);
            }
            if record.has_setter {
                buffer.put_word(base + layout.set_property, self.trampolines.static_set);
            }
            buffer.put_u32(base + layout.attributes, record.attributes);
        }
        buffer
    }

    /// Encode the records followed by a zeroed sentinel record
    pub fn encode_static_functions(&self, records: &[StaticFunctionRecord]) -> RawBuffer {
        let layout = &self.static_function;
        let mut buffer = RawBuffer::zeroed((records.len() + 1) * layout.size);
        for (i, record) in records.iter().enumerate() {
            let base = i * layout.size;
            buffer.put_word(base + layout.name, record.name);
            if record.has_callback {
                buffer.put_word(
                    base + layout.call_as_function,
                    self.trampolines.static_function,
                );
            }
            buffer.put_u32(base + layout.attributes, record.attributes);
        }
        buffer
    }
}
