//! Chain dispatch driven through the trampolines by the simulated engine

mod common;

use common::{CTX, engine, value};
use otter_jsclass::trampoline::finalize_trampoline;
use otter_jsclass::{
    Boundary, ClassDescriptor, Hook, HookKind, JsClassError, ObjectRef, Resolution,
    ScriptException, call_as_constructor, get_property, memo,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn chain(
    root: Arc<ClassDescriptor>,
    names: &[&str],
) -> (Arc<ClassDescriptor>, Vec<Arc<ClassDescriptor>>) {
    let mut classes = vec![root.clone()];
    let mut parent = root;
    for name in names {
        parent = ClassDescriptor::builder(*name).parent(&parent).build().unwrap();
        classes.push(parent.clone());
    }
    (parent, classes)
}

#[test]
fn test_root_only_get_property_serves_leaf_instance() {
    let engine = engine();
    let calls = counter();
    let seen = calls.clone();
    let root = ClassDescriptor::builder("Root")
        .hook(Hook::get_property(move |_, _, name| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok((name == "x").then(|| value(1)))
        }))
        .build()
        .unwrap();
    let (leaf, _) = chain(root, &["Middle", "Leaf"]);
    let object = engine.instantiate(&leaf);

    assert_eq!(engine.get_property(&leaf, object, "x"), Ok(Some(value(1))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(memo().get(HookKind::GetProperty, object).is_none());
}

#[test]
fn test_declining_middle_hands_over_to_root() {
    let engine = engine();
    let middle_calls = counter();
    let root_calls = counter();

    let seen = root_calls.clone();
    let root = ClassDescriptor::builder("DeclineRoot")
        .hook(Hook::get_property(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Some(value(2)))
        }))
        .build()
        .unwrap();
    let seen = middle_calls.clone();
    let middle = ClassDescriptor::builder("DeclineMiddle")
        .parent(&root)
        .hook(Hook::get_property(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }))
        .build()
        .unwrap();
    let leaf = ClassDescriptor::builder("DeclineLeaf").parent(&middle).build().unwrap();
    let object = engine.instantiate(&leaf);

    // The first offer stops at the declining hook and remembers the root
    assert_eq!(get_property(CTX, &leaf, object, "y"), Resolution::NotHandled);
    assert_eq!(
        memo().get(HookKind::GetProperty, object).map(|c| c.id()),
        Some(root.id())
    );

    // The next offer skips the middle class entirely
    assert_eq!(
        get_property(CTX, &leaf, object, "y"),
        Resolution::Handled(value(2))
    );
    assert_eq!(middle_calls.load(Ordering::SeqCst), 1);
    assert_eq!(root_calls.load(Ordering::SeqCst), 1);
    assert!(memo().get(HookKind::GetProperty, object).is_none());

    // Through the engine: one offer per hooked class
    assert_eq!(engine.get_property(&leaf, object, "y"), Ok(Some(value(2))));
    assert_eq!(middle_calls.load(Ordering::SeqCst), 2);
    assert_eq!(root_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unhandled_property_leaves_no_memo() {
    let engine = engine();
    let root = ClassDescriptor::builder("SilentRoot")
        .hook(Hook::get_property(|_, _, _| Ok(None)))
        .build()
        .unwrap();
    let leaf = ClassDescriptor::builder("SilentLeaf")
        .parent(&root)
        .hook(Hook::get_property(|_, _, _| Ok(None)))
        .build()
        .unwrap();
    let object = engine.instantiate(&leaf);

    assert_eq!(engine.get_property(&leaf, object, "nothing"), Ok(None));
    assert!(!memo().contains_instance(object));
}

#[test]
fn test_exception_stops_the_walk() {
    let engine = engine();
    let root_calls = counter();
    let seen = root_calls.clone();
    let root = ClassDescriptor::builder("ThrowRoot")
        .hook(Hook::get_property(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Some(value(3)))
        }))
        .build()
        .unwrap();
    let leaf = ClassDescriptor::builder("ThrowLeaf")
        .parent(&root)
        .hook(Hook::get_property(|_, _, _| Err(ScriptException(value(9)))))
        .build()
        .unwrap();
    let object = engine.instantiate(&leaf);

    assert_eq!(engine.get_property(&leaf, object, "z"), Err(value(9)));
    assert_eq!(root_calls.load(Ordering::SeqCst), 0);
    assert!(memo().get(HookKind::GetProperty, object).is_none());
}

#[test]
fn test_panicking_hook_becomes_script_error() {
    let engine = engine();
    let leaf = ClassDescriptor::builder("PanicLeaf")
        .hook(Hook::get_property(|_, _, _| panic!("boom")))
        .build()
        .unwrap();
    let object = engine.instantiate(&leaf);

    let error = engine.get_property(&leaf, object, "p").unwrap_err();
    let message = engine.error_message(error).unwrap();
    assert!(message.contains("boom"), "{message}");
    assert!(!memo().contains_instance(object));
}

#[test]
fn test_has_property_across_three_generations() {
    let engine = engine();
    let grandparent = ClassDescriptor::builder("GrandParent")
        .hook(Hook::has_property(|_, _, name| name == "inherited"))
        .build()
        .unwrap();
    let parent = ClassDescriptor::builder("Parent")
        .parent(&grandparent)
        .hook(Hook::has_property(|_, _, name| name == "own"))
        .build()
        .unwrap();
    let child = ClassDescriptor::builder("Child").parent(&parent).build().unwrap();
    let object = engine.instantiate(&child);

    assert!(engine.has_property(&child, object, "own"));
    assert!(engine.has_property(&child, object, "inherited"));
    assert!(!engine.has_property(&child, object, "missing"));
    assert!(memo().get(HookKind::HasProperty, object).is_none());
}

#[test]
fn test_set_property_declined_by_leaf() {
    let engine = engine();
    let stored = Arc::new(Mutex::new(Vec::new()));
    let sink = stored.clone();
    let root = ClassDescriptor::builder("SetRoot")
        .hook(Hook::set_property(move |_, _, name, value| {
            sink.lock().push((name.to_string(), value));
            Ok(true)
        }))
        .build()
        .unwrap();
    let leaf = ClassDescriptor::builder("SetLeaf")
        .parent(&root)
        .hook(Hook::set_property(|_, _, name, _| Ok(name == "local")))
        .build()
        .unwrap();
    let object = engine.instantiate(&leaf);

    assert_eq!(engine.set_property(&leaf, object, "local", value(4)), Ok(true));
    assert_eq!(engine.set_property(&leaf, object, "shared", value(5)), Ok(true));
    assert_eq!(*stored.lock(), vec![("shared".to_string(), value(5))]);
}

#[test]
fn test_property_names_add_up_along_the_chain() {
    let engine = engine();
    let root = ClassDescriptor::builder("NamesRoot")
        .hook(Hook::get_property_names(|_, _, names| names.add("c")))
        .build()
        .unwrap();
    let middle = ClassDescriptor::builder("NamesMiddle")
        .parent(&root)
        .hook(Hook::get_property_names(|_, _, names| {
            names.add("a");
            names.add("b");
        }))
        .build()
        .unwrap();
    let leaf = ClassDescriptor::builder("NamesLeaf").parent(&middle).build().unwrap();
    let object = engine.instantiate(&leaf);

    let mut names = engine.property_names(&leaf, object);
    names.sort();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert!(memo().get(HookKind::GetPropertyNames, object).is_none());
}

#[test]
fn test_forced_constructor_resolves_through_parent() {
    let engine = engine();
    let built = ObjectRef::from_addr(0x6000_0000);
    let root = ClassDescriptor::builder("CtorRoot")
        .hook(Hook::call_as_constructor(move |_, _, args| {
            assert_eq!(args.len(), 1);
            Ok(Some(built))
        }))
        .build()
        .unwrap();
    let leaf = ClassDescriptor::builder("CtorLeaf")
        .parent(&root)
        .force_constructor(true)
        .build()
        .unwrap();
    let constructor = engine.instantiate(&leaf);

    assert_eq!(engine.construct(&leaf, constructor, &[value(1)]), Ok(built));
    assert!(memo().get(HookKind::CallAsConstructor, constructor).is_none());
}

#[test]
fn test_constructor_without_hook_is_rejected() {
    let engine = engine();
    let root = ClassDescriptor::new("NoCtorRoot").unwrap();
    let leaf = ClassDescriptor::builder("NoCtorLeaf")
        .parent(&root)
        .force_constructor(true)
        .build()
        .unwrap();
    let constructor = engine.instantiate(&leaf);

    let err = call_as_constructor(CTX, &leaf, constructor, &[]).unwrap_err();
    assert!(matches!(err, JsClassError::NoHookInChain { .. }));
    assert!(err.is_protocol_violation());
}

#[test]
fn test_concurrent_resolution_on_distinct_instances() {
    let engine = engine();
    let root = ClassDescriptor::builder("ConcurrentRoot")
        .hook(Hook::get_property(|_, object, _| {
            Ok(Some(otter_jsclass::ValueRef::from_addr(object.addr())))
        }))
        .build()
        .unwrap();
    let middle = ClassDescriptor::builder("ConcurrentMiddle")
        .parent(&root)
        .hook(Hook::get_property(|_, _, name| {
            Ok((name == "middle").then(|| value(8)))
        }))
        .build()
        .unwrap();
    let leaf = ClassDescriptor::builder("ConcurrentLeaf").parent(&middle).build().unwrap();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let object = engine.instantiate(&leaf);
                for _ in 0..100 {
                    assert_eq!(
                        engine.get_property(&leaf, object, "root"),
                        Ok(Some(otter_jsclass::ValueRef::from_addr(object.addr())))
                    );
                    assert_eq!(engine.get_property(&leaf, object, "middle"), Ok(Some(value(8))));
                }
                assert!(!memo().contains_instance(object));
            });
        }
    });
}

#[test]
fn test_dispose_purges_memo_entries() {
    let engine = engine();
    let root = ClassDescriptor::builder("DisposeRoot")
        .hook(Hook::get_property(|_, _, _| Ok(Some(value(6)))))
        .build()
        .unwrap();
    let leaf = ClassDescriptor::builder("DisposeLeaf")
        .parent(&root)
        .hook(Hook::get_property(|_, _, _| Ok(None)))
        .build()
        .unwrap();
    let object = engine.instantiate(&leaf);
    let root_ref = root.created_class_ref().unwrap();

    assert_eq!(get_property(CTX, &leaf, object, "q"), Resolution::NotHandled);
    assert!(memo().contains_instance(object));

    root.dispose();
    assert!(!memo().contains_instance(object));
    assert!(engine.is_released(root_ref));
    assert!(ClassDescriptor::lookup(root.id()).is_none());

    leaf.dispose();
    // Instances of a disposed class are no longer dispatched
    assert_eq!(engine.get_property(&leaf, object, "q"), Ok(None));
}

#[test]
fn test_finalize_during_dispatch_leaves_no_memo_entry() {
    let engine = engine();
    let root = ClassDescriptor::builder("CollectedRoot")
        .hook(Hook::get_property(|_, _, _| Ok(Some(value(9)))))
        .build()
        .unwrap();
    let leaf = ClassDescriptor::builder("CollectedLeaf")
        .parent(&root)
        .hook(Hook::get_property(|_, object, _| {
            // The collector finalizes the instance while its hook still runs
            // SAFETY: the simulated engine hands out plain handles
            unsafe { finalize_trampoline(object.as_raw()) };
            Ok(None)
        }))
        .build()
        .unwrap();
    let object = engine.instantiate(&leaf);

    assert_eq!(engine.get_property(&leaf, object, "gone"), Ok(None));
    assert_eq!(engine.private_data(object), 0);
    assert!(!memo().contains_instance(object));
}
