//! Integration tests for property reflection
//!
//! Tests cover:
//! - Typed get/set through `Value`
//! - Inherited property lookup
//! - Weak object fields and null assignment

use sysobj_core::{
    add_property, impl_vtable, Instance, Object, ObjectClass, PropertyError, TypeId, TypeInfo,
    TypeRegistry, Value, ValueKind, Vtable,
};

#[derive(Default)]
struct NodeClass {
    parent: ObjectClass,
}
impl_vtable!(NodeClass, parent);

fn node_class_init(_class: &mut dyn Vtable) {}

#[repr(C)]
struct TreeNode {
    parent: Object,
    id: i64,
    visible: bool,
    next: Option<Instance>,
    user_data: *mut u8,
}

#[repr(C)]
struct LeafNode {
    parent: TreeNode,
    weight: f64,
    depth: i32,
}

struct Fixture {
    registry: TypeRegistry,
    tree: TypeId,
    leaf: TypeId,
}

fn fixture() -> Fixture {
    let registry = TypeRegistry::new();
    let tree = registry
        .register_type(
            TypeId::OBJECT,
            TypeInfo::class::<NodeClass, TreeNode>("TreeNode").with_class_init(node_class_init),
        )
        .unwrap();
    let leaf = registry
        .register_type(
            tree,
            TypeInfo::class::<NodeClass, LeafNode>("LeafNode").with_class_init(node_class_init),
        )
        .unwrap();

    add_property!(registry, tree, TreeNode, id, ValueKind::Long).unwrap();
    add_property!(registry, tree, TreeNode, visible, ValueKind::Bool).unwrap();
    add_property!(registry, tree, TreeNode, next, ValueKind::Object).unwrap();
    add_property!(registry, tree, TreeNode, user_data, ValueKind::Pointer).unwrap();
    add_property!(registry, leaf, LeafNode, weight, ValueKind::Double).unwrap();
    add_property!(registry, leaf, LeafNode, depth, ValueKind::Int).unwrap();
    Fixture {
        registry,
        tree,
        leaf,
    }
}

#[test]
fn test_properties_listed_in_registration_order() {
    let f = fixture();
    let names: Vec<String> = f
        .registry
        .get_properties(f.tree)
        .iter()
        .map(|param| param.name().to_string())
        .collect();
    assert_eq!(names, ["id", "visible", "next", "user_data"]);

    let leaf_props = f.registry.get_properties(f.leaf);
    assert_eq!(leaf_props.len(), 2);
    assert_eq!(leaf_props[0].owner(), f.leaf);
    assert_eq!(leaf_props[0].owner_name(), "LeafNode");
    assert_eq!(leaf_props[0].kind(), ValueKind::Double);
}

#[test]
fn test_fields_written_in_place() {
    let f = fixture();
    let obj = f.registry.object_new(f.leaf).unwrap();

    f.registry.set_property(obj, "id", 42i64).unwrap();
    f.registry.set_property(obj, "depth", 3i32).unwrap();
    f.registry.set_property(obj, "weight", 0.75f64).unwrap();

    let node = unsafe { obj.data::<LeafNode>() };
    assert_eq!(node.parent.id, 42);
    assert_eq!(node.depth, 3);
    assert_eq!(node.weight, 0.75);
    f.registry.object_unref(obj);
}

#[test]
fn test_inherited_lookup() {
    let f = fixture();
    let obj = f.registry.object_new(f.leaf).unwrap();

    f.registry.set_property(obj, "visible", true).unwrap();
    assert_eq!(f.registry.get_property(obj, "visible"), Ok(Value::Bool(true)));
    let param = f.registry.find_property(f.leaf, "id").unwrap();
    assert_eq!(param.owner(), f.tree);
    assert!(f.registry.find_property(f.tree, "depth").is_none());
    f.registry.object_unref(obj);
}

#[test]
fn test_object_fields_are_weak() {
    let f = fixture();
    let first = f.registry.object_new(f.tree).unwrap();
    let second = f.registry.object_new(f.tree).unwrap();

    f.registry.set_property(first, "next", second).unwrap();
    assert_eq!(second.ref_count(), 1);
    assert_eq!(
        f.registry.get_property(first, "next").unwrap().as_object(),
        Some(second)
    );

    f.registry.set_property(first, "next", Value::Null).unwrap();
    assert_eq!(f.registry.get_property(first, "next"), Ok(Value::Object(None)));

    f.registry.object_unref(second);
    f.registry.object_unref(first);
}

#[test]
fn test_pointer_fields_accept_null() {
    let f = fixture();
    let obj = f.registry.object_new(f.tree).unwrap();
    let mut payload = 7u8;

    f.registry
        .set_property(obj, "user_data", Value::Pointer(&mut payload))
        .unwrap();
    let stored = f.registry.get_property(obj, "user_data").unwrap();
    assert_eq!(stored.as_pointer(), Some(&mut payload as *mut u8));

    f.registry.set_property(obj, "user_data", Value::Null).unwrap();
    assert!(f.registry.get_property(obj, "user_data").unwrap().is_null());
    f.registry.object_unref(obj);
}

#[test]
fn test_mismatch_and_missing_are_recoverable() {
    let f = fixture();
    let obj = f.registry.object_new(f.tree).unwrap();
    f.registry.set_property(obj, "id", 9i64).unwrap();

    assert!(matches!(
        f.registry.set_property(obj, "id", 1.0f64),
        Err(PropertyError::TypeMismatch { .. })
    ));
    assert!(matches!(
        f.registry.set_property(obj, "visible", Value::Null),
        Err(PropertyError::TypeMismatch { .. })
    ));
    assert!(matches!(
        f.registry.get_property(obj, "weight"),
        Err(PropertyError::NotFound { .. })
    ));
    assert_eq!(f.registry.get_property(obj, "id"), Ok(Value::Long(9)));
    f.registry.object_unref(obj);
}
