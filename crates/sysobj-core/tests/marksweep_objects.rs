//! Integration tests for objects under the mark-sweep strategy
//!
//! Only one test here runs a collection: collections sweep every
//! auto-tracked block on the global collector that the calling thread does
//! not root.

use std::cell::Cell;

use sysobj_core::{
    chain_finalize, impl_vtable, Collector, Instance, Object, ObjectClass, RuntimeOptions,
    Strategy, TypeId, TypeInfo, TypeRegistry, Vtable,
};

thread_local! {
    static FINALIZED: Cell<u32> = const { Cell::new(0) };
    static TRACKED: Cell<TypeId> = const { Cell::new(TypeId::OBJECT) };
}

#[derive(Default)]
struct TrackedClass {
    parent: ObjectClass,
}
impl_vtable!(TrackedClass, parent);

#[repr(C)]
struct Tracked {
    parent: Object,
    payload: [u64; 4],
}

fn tracked_class_init(class: &mut dyn Vtable) {
    if let Some(object) = class.find_mut::<ObjectClass>() {
        object.finalize = Some(tracked_finalize);
    }
}

fn tracked_finalize(obj: Instance) {
    FINALIZED.with(|c| c.set(c.get() + 1));
    chain_finalize(TRACKED.with(Cell::get), obj);
}

fn register(registry: &TypeRegistry) -> TypeId {
    let ty = registry
        .register_type(
            TypeId::OBJECT,
            TypeInfo::class::<TrackedClass, Tracked>("Tracked")
                .with_private::<u64>()
                .with_class_init(tracked_class_init),
        )
        .unwrap();
    TRACKED.with(|c| c.set(ty));
    ty
}

fn finalized() -> u32 {
    FINALIZED.with(Cell::get)
}

#[test]
fn test_unrooted_objects_are_swept() {
    let registry =
        TypeRegistry::with_options(RuntimeOptions::default().with_strategy(Strategy::MarkSweep));
    let ty = register(&registry);
    let collector = Collector::global();
    let blocks_before = collector.block_count();

    let kept = registry.object_new(ty).unwrap();
    let dropped = registry.object_new(ty).unwrap();
    let manual = registry.object_new(ty).unwrap();
    assert!(registry.track_auto(kept));
    assert!(registry.track_auto(dropped));
    assert_eq!(collector.block_count(), blocks_before + 3);
    assert_eq!(registry.class_ref_count(ty), 3);

    let root = registry.root_instance(kept, "kept");
    let stats = collector.collect();
    assert_eq!(stats.freed, 1);
    assert_eq!(stats.marked, 1);
    assert_eq!(finalized(), 1);
    assert_eq!(registry.class_ref_count(ty), 2);
    assert_eq!(collector.block_count(), blocks_before + 2);
    assert_eq!(kept.ref_count(), 1);
    assert_eq!(kept.type_id(), ty);

    drop(root);
    let stats = collector.collect();
    assert_eq!(stats.freed, 1);
    assert_eq!(finalized(), 2);
    assert_eq!(registry.class_ref_count(ty), 1);

    assert!(registry.object_unref(manual));
    assert_eq!(finalized(), 3);
    assert_eq!(registry.class_ref_count(ty), 0);
    assert_eq!(collector.block_count(), blocks_before);
}

#[test]
fn test_track_auto_needs_mark_sweep() {
    let registry = TypeRegistry::new();
    let ty = register(&registry);
    let obj = registry.object_new(ty).unwrap();
    assert!(!registry.track_auto(obj));
    assert!(registry.object_unref(obj));
}
