//! Class descriptors
//!
//! A [`ClassDescriptor`] collects everything the engine needs to create a
//! host class: name, attributes, parent, static tables, and hooks. It stays
//! mutable until it is serialized. From then on its definition buffer is
//! owned by the engine class and every structural change is rejected.
//!
//! Classes with an engine counterpart are kept in a process-wide registry
//! keyed by [`ClassId`], so that trampolines can find an instance's leaf
//! class from the id stored in its private data.

use crate::attributes::ClassAttributes;
use crate::boundary::boundary;
use crate::buffer::RawBuffer;
use crate::config::config;
use crate::error::{JsClassError, JsClassResult};
use crate::handle::{ClassId, ClassRef};
use crate::hooks::{ClassHooks, Hook, HookKind};
use crate::layout::{ClassFields, layouts};
use crate::memo::memo;
use crate::static_functions::StaticFunctionTable;
use crate::static_values::StaticPropertyTable;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::ffi::CString;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use tracing::debug;

static CLASSES: LazyLock<DashMap<ClassId, Arc<ClassDescriptor>>> = LazyLock::new(DashMap::new);

/// Serializes parent changes across all classes, so two of them cannot
/// each pass the cycle check against the other's old parent.
static HIERARCHY: Mutex<()> = Mutex::new(());

struct ClassState {
    version: i32,
    attributes: ClassAttributes,
    parent: Option<Arc<ClassDescriptor>>,
    static_values: Option<Arc<StaticPropertyTable>>,
    static_functions: Option<Arc<StaticFunctionTable>>,
    hooks: ClassHooks,
    forward_finalize: bool,
    force_constructor: bool,
}

/// A definition and the table record arrays its words point into
struct Serialized {
    definition: RawBuffer,
    _tables: [Option<Arc<RawBuffer>>; 2],
}

/// A host-defined class
pub struct ClassDescriptor {
    id: ClassId,
    name: String,
    c_name: CString,
    state: RwLock<ClassState>,
    serialize_lock: Mutex<()>,
    create_lock: Mutex<()>,
    serialized: OnceLock<Serialized>,
    class_ref: OnceLock<ClassRef>,
    disposed: AtomicBool,
}

impl ClassDescriptor {
    pub fn new(name: impl Into<String>) -> JsClassResult<Arc<Self>> {
        let name = name.into();
        let c_name = CString::new(name.as_str()).map_err(|_| JsClassError::InvalidName(name.clone()))?;
        Ok(Arc::new(Self {
            id: ClassId::next(),
            name,
            c_name,
            state: RwLock::new(ClassState {
                version: 0,
                attributes: ClassAttributes::NONE,
                parent: None,
                static_values: None,
                static_functions: None,
                hooks: ClassHooks::default(),
                forward_finalize: config().forward_finalize,
                force_constructor: false,
            }),
            serialize_lock: Mutex::new(()),
            create_lock: Mutex::new(()),
            serialized: OnceLock::new(),
            class_ref: OnceLock::new(),
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder::new(name)
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live class registered under `id`
    pub fn lookup(id: ClassId) -> Option<Arc<ClassDescriptor>> {
        CLASSES.get(&id).map(|class| class.clone())
    }

    /// Number of classes with a live engine counterpart
    pub fn live_classes() -> usize {
        CLASSES.len()
    }

    /// Run a structural change, rejecting it once frozen or disposed
    fn modify<R>(&self, change: impl FnOnce(&mut ClassState) -> JsClassResult<R>) -> JsClassResult<R> {
        let mut state = self.state.write();
        if self.is_disposed() {
            return Err(JsClassError::Disposed(self.name.clone()));
        }
        if self.is_serialized() {
            return Err(JsClassError::frozen(format!("class {}", self.name)));
        }
        change(&mut state)
    }

    pub fn set_version(&self, version: i32) -> JsClassResult<()> {
        self.modify(|state| {
            state.version = version;
            Ok(())
        })
    }

    pub fn set_attributes(&self, attributes: ClassAttributes) -> JsClassResult<()> {
        self.modify(|state| {
            state.attributes = attributes;
            Ok(())
        })
    }

    /// Set or clear the parent. A parent that has this class among its own
    /// ancestors is rejected.
    pub fn set_parent(&self, parent: Option<Arc<ClassDescriptor>>) -> JsClassResult<()> {
        let _hierarchy = HIERARCHY.lock();
        if let Some(parent) = &parent {
            if parent.ancestors().any(|ancestor| ancestor.id == self.id) {
                return Err(JsClassError::CyclicHierarchy {
                    child: self.name.clone(),
                    parent: parent.name.clone(),
                });
            }
        }
        self.modify(|state| {
            state.parent = parent;
            Ok(())
        })
    }

    pub fn set_static_values(&self, table: Arc<StaticPropertyTable>) -> JsClassResult<()> {
        self.modify(|state| {
            state.static_values = Some(table);
            Ok(())
        })
    }

    pub fn set_static_functions(&self, table: Arc<StaticFunctionTable>) -> JsClassResult<()> {
        self.modify(|state| {
            state.static_functions = Some(table);
            Ok(())
        })
    }

    pub fn set_hook(&self, hook: Hook) -> JsClassResult<()> {
        self.modify(|state| {
            state.hooks.set(hook);
            Ok(())
        })
    }

    /// Whether the engine should call back on finalization even when no
    /// class in the chain defines a finalize hook. Finalization also
    /// releases per-instance dispatch state.
    pub fn set_forward_finalize(&self, enabled: bool) -> JsClassResult<()> {
        self.modify(|state| {
            state.forward_finalize = enabled;
            Ok(())
        })
    }

    /// Fill the callAsConstructor slot even without a hook of its own, so
    /// construction resolves through the parent chain.
    pub fn set_force_constructor(&self, enabled: bool) -> JsClassResult<()> {
        self.modify(|state| {
            state.force_constructor = enabled;
            Ok(())
        })
    }

    pub fn parent(&self) -> Option<Arc<ClassDescriptor>> {
        self.state.read().parent.clone()
    }

    /// This class followed by its ancestors, leaf to root
    pub fn ancestors(self: &Arc<Self>) -> impl Iterator<Item = Arc<ClassDescriptor>> + use<> {
        std::iter::successors(Some(self.clone()), |class| class.parent())
    }

    pub fn static_values(&self) -> Option<Arc<StaticPropertyTable>> {
        self.state.read().static_values.clone()
    }

    pub fn static_functions(&self) -> Option<Arc<StaticFunctionTable>> {
        self.state.read().static_functions.clone()
    }

    /// Read the hooks. Callers clone what they need and invoke it after
    /// the closure returns, with no lock held.
    pub fn with_hooks<R>(&self, f: impl FnOnce(&ClassHooks) -> R) -> R {
        f(&self.state.read().hooks)
    }

    pub fn defines(&self, kind: HookKind) -> bool {
        self.with_hooks(|hooks| hooks.defines(kind))
    }

    pub fn is_serialized(&self) -> bool {
        self.serialized.get().is_some()
    }

    /// The definition handed to the engine, if the class was serialized.
    ///
    /// Unlike [`serialize`](Self::serialize) this still answers after
    /// disposal, for instances the engine created before.
    pub fn definition(&self) -> Option<&RawBuffer> {
        self.serialized.get().map(|serialized| &serialized.definition)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Serialize the definition, freezing the class and its static tables.
    ///
    /// The parent is turned into an engine class first, since the
    /// definition refers to it by class ref.
    pub fn serialize(&self) -> JsClassResult<&RawBuffer> {
        if self.is_disposed() {
            return Err(JsClassError::Disposed(self.name.clone()));
        }
        if let Some(definition) = self.definition() {
            return Ok(definition);
        }
        let _guard = self.serialize_lock.lock();
        if let Some(definition) = self.definition() {
            return Ok(definition);
        }
        if self.is_disposed() {
            return Err(JsClassError::Disposed(self.name.clone()));
        }

        // Held across the freeze so no structural change slips in between
        let state = self.state.read();
        let layouts = layouts()?;

        let parent_class = match &state.parent {
            Some(parent) => parent.class_ref()?.addr(),
            None => 0,
        };
        let value_records = match &state.static_values {
            Some(table) => Some(table.serialize()?),
            None => None,
        };
        let function_records = match &state.static_functions {
            Some(table) => Some(table.serialize()?),
            None => None,
        };
        let address = |records: &Option<Arc<RawBuffer>>| {
            records.as_ref().map_or(0, |records| records.as_ptr() as usize)
        };

        let mut slots = [false; HookKind::COUNT];
        for kind in HookKind::ALL {
            slots[kind.index()] = state.hooks.defines(kind);
        }
        slots[HookKind::Finalize.index()] = state.forward_finalize;
        slots[HookKind::CallAsConstructor.index()] |= state.force_constructor;

        let definition = layouts.encode_class(&ClassFields {
            version: state.version,
            attributes: state.attributes.bits(),
            class_name: self.c_name.as_ptr() as usize,
            parent_class,
            static_values: address(&value_records),
            static_functions: address(&function_records),
            slots,
        });
        debug!(class = %self.name, id = %self.id, hooks = ?state.hooks, "Serialized class definition");

        let serialized = self.serialized.get_or_init(|| Serialized {
            definition,
            _tables: [value_records, function_records],
        });
        drop(state);
        Ok(&serialized.definition)
    }

    /// The engine class for this descriptor, creating it on first use.
    pub fn class_ref(self: &Arc<Self>) -> JsClassResult<ClassRef> {
        if self.is_disposed() {
            return Err(JsClassError::Disposed(self.name.clone()));
        }
        if let Some(class_ref) = self.class_ref.get() {
            return Ok(*class_ref);
        }
        let _guard = self.create_lock.lock();
        if self.is_disposed() {
            return Err(JsClassError::Disposed(self.name.clone()));
        }
        if let Some(class_ref) = self.class_ref.get() {
            return Ok(*class_ref);
        }

        let definition = self.serialize()?;
        let class_ref = boundary()?
            .create_class(definition)
            .filter(|class_ref| !class_ref.is_null())
            .ok_or_else(|| JsClassError::ClassCreation(self.name.clone()))?;

        CLASSES.insert(self.id, self.clone());
        debug!(class = %self.name, id = %self.id, ?class_ref, "Created engine class");
        Ok(*self.class_ref.get_or_init(|| class_ref))
    }

    /// Engine class, if one was created
    pub fn created_class_ref(&self) -> Option<ClassRef> {
        self.class_ref.get().copied()
    }

    /// Tear the class down.
    ///
    /// Unregisters the class, purges memo entries naming it, releases the
    /// engine class, and drops its tables with their per-instance bindings.
    /// Idempotent. The serialized definition stays readable through
    /// [`definition`](Self::definition) but is never handed out again.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        // A concurrent class_ref either registered before this or sees the flag
        let creation = self.create_lock.lock();
        CLASSES.remove(&self.id);
        memo().purge_class(self.id);
        if let Some(class_ref) = self.class_ref.get() {
            match boundary() {
                Ok(boundary) => boundary.release_class(*class_ref),
                Err(e) => tracing::warn!(class = %self.name, "Cannot release engine class: {}", e),
            }
        }
        drop(creation);

        let mut state = self.state.write();
        if let Some(table) = state.static_functions.take() {
            table.dispose();
        }
        if let Some(table) = state.static_values.take() {
            table.dispose();
        }
        state.hooks = ClassHooks::default();
        state.parent = None;
        state.force_constructor = false;
        drop(state);
        debug!(class = %self.name, id = %self.id, "Disposed class");
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("ClassDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &state.parent.as_ref().map(|p| p.name.clone()))
            .field("hooks", &state.hooks)
            .field("serialized", &self.is_serialized())
            .finish()
    }
}

/// Builder for [`ClassDescriptor`]
pub struct ClassBuilder {
    name: String,
    parent: Option<Arc<ClassDescriptor>>,
    attributes: ClassAttributes,
    static_values: Option<Arc<StaticPropertyTable>>,
    static_functions: Option<Arc<StaticFunctionTable>>,
    hooks: Vec<Hook>,
    forward_finalize: Option<bool>,
    force_constructor: bool,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            attributes: ClassAttributes::NONE,
            static_values: None,
            static_functions: None,
            hooks: Vec::new(),
            forward_finalize: None,
            force_constructor: false,
        }
    }

    pub fn parent(mut self, parent: &Arc<ClassDescriptor>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn attributes(mut self, attributes: ClassAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn static_values(mut self, table: Arc<StaticPropertyTable>) -> Self {
        self.static_values = Some(table);
        self
    }

    pub fn static_functions(mut self, table: Arc<StaticFunctionTable>) -> Self {
        self.static_functions = Some(table);
        self
    }

    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn forward_finalize(mut self, enabled: bool) -> Self {
        self.forward_finalize = Some(enabled);
        self
    }

    pub fn force_constructor(mut self, enabled: bool) -> Self {
        self.force_constructor = enabled;
        self
    }

    pub fn build(self) -> JsClassResult<Arc<ClassDescriptor>> {
        let class = ClassDescriptor::new(self.name)?;
        class.set_attributes(self.attributes)?;
        class.set_parent(self.parent)?;
        if let Some(table) = self.static_values {
            class.set_static_values(table)?;
        }
        if let Some(table) = self.static_functions {
            class.set_static_functions(table)?;
        }
        for hook in self.hooks {
            class.set_hook(hook)?;
        }
        if let Some(enabled) = self.forward_finalize {
            class.set_forward_finalize(enabled)?;
        }
        class.set_force_constructor(self.force_constructor)?;
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::PropertyAttributes;
    use crate::handle::ValueRef;
    use crate::testing::install_stub;

    #[test]
    fn test_builder_sets_everything() {
        let root = ClassDescriptor::new("BuilderRoot").unwrap();
        let class = ClassDescriptor::builder("BuilderLeaf")
            .parent(&root)
            .hook(Hook::get_property(|_, _, _| Ok(Some(ValueRef::from_addr(1)))))
            .force_constructor(true)
            .build()
            .unwrap();

        assert_eq!(class.name(), "BuilderLeaf");
        assert_eq!(class.parent().map(|p| p.id()), Some(root.id()));
        assert!(class.defines(HookKind::GetProperty));
        assert!(!class.defines(HookKind::SetProperty));
    }

    #[test]
    fn test_ancestors_walk_leaf_to_root() {
        let root = ClassDescriptor::new("Root").unwrap();
        let middle = ClassDescriptor::builder("Middle").parent(&root).build().unwrap();
        let leaf = ClassDescriptor::builder("Leaf").parent(&middle).build().unwrap();

        let names: Vec<_> = leaf.ancestors().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["Leaf", "Middle", "Root"]);
    }

    #[test]
    fn test_cycles_are_rejected() {
        let a = ClassDescriptor::new("CycleA").unwrap();
        let b = ClassDescriptor::builder("CycleB").parent(&a).build().unwrap();

        assert!(matches!(
            a.set_parent(Some(b.clone())),
            Err(JsClassError::CyclicHierarchy { .. })
        ));
        assert!(matches!(
            a.set_parent(Some(a.clone())),
            Err(JsClassError::CyclicHierarchy { .. })
        ));
        assert!(a.parent().is_none());
    }

    #[test]
    fn test_invalid_class_name() {
        assert!(matches!(
            ClassDescriptor::new("bad\0name"),
            Err(JsClassError::InvalidName(_))
        ));
    }

    #[test]
    fn test_serialize_root_class() {
        let values = Arc::new(StaticPropertyTable::new());
        values
            .add("x", None, None, PropertyAttributes::NONE)
            .unwrap();
        let class = ClassDescriptor::builder("SerializedRoot")
            .attributes(ClassAttributes::NO_AUTOMATIC_PROTOTYPE)
            .static_values(values.clone())
            .hook(Hook::has_property(|_, _, _| false))
            .build()
            .unwrap();

        let definition = class.serialize().unwrap();
        let layouts = layouts().unwrap();
        let layout = &layouts.class;

        assert_eq!(
            definition.get_u32(layout.attributes),
            ClassAttributes::NO_AUTOMATIC_PROTOTYPE.bits()
        );
        assert_eq!(definition.get_word(layout.parent_class), 0);
        assert_eq!(
            definition.get_word(layout.static_values),
            values.serialize().unwrap().as_ptr() as usize
        );
        assert_eq!(definition.get_word(layout.static_functions), 0);
        assert_eq!(
            definition.get_word(layout.hook(HookKind::HasProperty)),
            layouts.trampolines.hook(HookKind::HasProperty)
        );
        // finalize is forwarded by default
        assert_eq!(
            definition.get_word(layout.hook(HookKind::Finalize)),
            layouts.trampolines.hook(HookKind::Finalize)
        );
        assert_eq!(definition.get_word(layout.hook(HookKind::CallAsConstructor)), 0);
        assert!(values.is_frozen());
    }

    #[test]
    fn test_constructor_forcing_and_finalize_opt_out() {
        let class = ClassDescriptor::builder("Forced")
            .force_constructor(true)
            .forward_finalize(false)
            .build()
            .unwrap();
        let definition = class.serialize().unwrap();
        let layout = &layouts().unwrap().class;

        assert_ne!(definition.get_word(layout.hook(HookKind::CallAsConstructor)), 0);
        assert_eq!(definition.get_word(layout.hook(HookKind::Finalize)), 0);
    }

    #[test]
    fn test_changes_after_serialize_are_frozen() {
        let class = ClassDescriptor::new("FrozenClass").unwrap();
        let before = class.serialize().unwrap().bytes().to_vec();

        assert!(matches!(
            class.set_hook(Hook::finalize(|_| {})),
            Err(JsClassError::Frozen { .. })
        ));
        assert!(matches!(
            class.set_parent(None),
            Err(JsClassError::Frozen { .. })
        ));
        assert_eq!(class.serialize().unwrap().bytes(), &before[..]);
    }

    #[test]
    fn test_dispose_without_engine_class() {
        let class = ClassDescriptor::new("DisposedEarly").unwrap();
        class.dispose();
        class.dispose();
        assert!(class.is_disposed());
        assert!(matches!(class.serialize(), Err(JsClassError::Disposed(_))));
        assert!(matches!(
            class.set_version(1),
            Err(JsClassError::Disposed(_))
        ));
    }

    #[test]
    fn test_disposed_class_is_never_created_again() {
        let values = Arc::new(StaticPropertyTable::new());
        values
            .add("x", None, None, PropertyAttributes::NONE)
            .unwrap();
        let class = ClassDescriptor::builder("RecreatedAfterDispose")
            .static_values(values.clone())
            .build()
            .unwrap();
        class.serialize().unwrap();
        let records = values.serialize().unwrap();

        class.dispose();
        assert!(!values.is_frozen());
        assert!(matches!(class.serialize(), Err(JsClassError::Disposed(_))));
        assert!(matches!(class.class_ref(), Err(JsClassError::Disposed(_))));
        assert!(ClassDescriptor::lookup(class.id()).is_none());
        assert!(class.created_class_ref().is_none());

        // The old definition still points at record arrays kept alive with it
        let layout = &layouts().unwrap().class;
        let definition = class.definition().unwrap();
        assert_eq!(
            definition.get_word(layout.static_values),
            records.as_ptr() as usize
        );
        assert!(Arc::strong_count(&records) >= 2);

        let child = ClassDescriptor::builder("ChildOfDisposed")
            .parent(&class)
            .build()
            .unwrap();
        assert!(matches!(child.serialize(), Err(JsClassError::Disposed(_))));
    }

    #[test]
    fn test_dispose_after_creation_unregisters() {
        install_stub();
        let class = ClassDescriptor::new("CreatedThenDisposed").unwrap();
        class.class_ref().unwrap();
        assert!(ClassDescriptor::lookup(class.id()).is_some());

        class.dispose();
        assert!(ClassDescriptor::lookup(class.id()).is_none());
        assert!(matches!(class.class_ref(), Err(JsClassError::Disposed(_))));
        assert!(ClassDescriptor::lookup(class.id()).is_none());
    }

    #[test]
    fn test_concurrent_reparenting_cannot_form_a_cycle() {
        for _ in 0..200 {
            let a = ClassDescriptor::new("RaceA").unwrap();
            let b = ClassDescriptor::new("RaceB").unwrap();

            let (first, second) = std::thread::scope(|scope| {
                let first = scope.spawn(|| a.set_parent(Some(b.clone())));
                let second = scope.spawn(|| b.set_parent(Some(a.clone())));
                (first.join().unwrap(), second.join().unwrap())
            });

            assert!(first.is_err() || second.is_err());
            assert!(a.ancestors().take(3).count() <= 2);
            assert!(b.ancestors().take(3).count() <= 2);

            // Break any link so the pair can be dropped
            a.set_parent(None).unwrap();
            b.set_parent(None).unwrap();
        }
    }
}
