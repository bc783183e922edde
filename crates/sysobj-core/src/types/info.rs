//! Type declarations passed to the registry.

use std::mem;

use super::{NodeKind, Vtable};
use crate::class::ClassDescriptor;
use crate::instance::Instance;

/// Writes a class's slots into the (most-derived) class struct
pub type ClassInitFn = fn(&mut dyn Vtable);

/// Runs when a class descriptor is released
pub type ClassFinalizeFn = fn(&ClassDescriptor);

/// Initializes a freshly allocated, zeroed instance
pub type InstanceInitFn = fn(Instance);

/// Writes an interface's slots into an interface vtable
pub type InterfaceInitFn = fn(&mut dyn Vtable);

pub(crate) fn new_vtable<V: Vtable + Default>() -> Box<dyn Vtable> {
    Box::<V>::default()
}

/// Declaration of a class or interface
///
/// Built with [`TypeInfo::class`] or [`TypeInfo::interface`], which fill
/// in the sizes from the Rust types involved. Instance structs must be
/// `#[repr(C)]`, start with their parent's instance struct (ultimately
/// [`Object`](crate::Object)), and be valid when zeroed.
///
/// ```
/// use sysobj_core::{impl_vtable, Object, ObjectClass, TypeId, TypeInfo, TypeRegistry, Vtable};
///
/// #[derive(Default)]
/// struct CounterClass {
///     parent: ObjectClass,
/// }
/// impl_vtable!(CounterClass, parent);
///
/// #[repr(C)]
/// struct Counter {
///     parent: Object,
///     value: i64,
/// }
///
/// fn counter_class_init(_class: &mut dyn Vtable) {}
///
/// let registry = TypeRegistry::new();
/// let counter = registry
///     .register_type(
///         TypeId::OBJECT,
///         TypeInfo::class::<CounterClass, Counter>("Counter").with_class_init(counter_class_init),
///     )
///     .unwrap();
/// assert!(registry.type_is_a(counter, TypeId::OBJECT));
/// ```
#[derive(Clone)]
pub struct TypeInfo {
    pub kind: NodeKind,
    pub name: String,
    /// Size of the class struct, or of the vtable for interfaces
    pub class_size: usize,
    pub instance_size: usize,
    /// Size of this class's own private data
    pub private_size: usize,
    pub class_new: Option<fn() -> Box<dyn Vtable>>,
    pub class_init: Option<ClassInitFn>,
    pub class_finalize: Option<ClassFinalizeFn>,
    pub instance_init: Option<InstanceInitFn>,
    /// Default slots of an interface, run before the implementer's init
    pub default_init: Option<InterfaceInitFn>,
}

impl TypeInfo {
    /// An instantiable class with class struct `C` and instance struct `I`.
    pub fn class<C: Vtable + Default, I>(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::BaseClass,
            name: name.into(),
            class_size: mem::size_of::<C>(),
            instance_size: mem::size_of::<I>(),
            private_size: 0,
            class_new: Some(new_vtable::<C>),
            class_init: None,
            class_finalize: None,
            instance_init: None,
            default_init: None,
        }
    }

    /// An interface with vtable struct `V`.
    pub fn interface<V: Vtable + Default>(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Interface,
            name: name.into(),
            class_size: mem::size_of::<V>(),
            instance_size: 0,
            private_size: 0,
            class_new: Some(new_vtable::<V>),
            class_init: None,
            class_finalize: None,
            instance_init: None,
            default_init: None,
        }
    }

    /// A fundamental marker type.
    pub fn fundamental(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Fundamental,
            name: name.into(),
            class_size: 0,
            instance_size: 0,
            private_size: 0,
            class_new: None,
            class_init: None,
            class_finalize: None,
            instance_init: None,
            default_init: None,
        }
    }

    pub fn abstract_class(mut self) -> Self {
        self.kind = NodeKind::AbstractClass;
        self
    }

    /// Reserve private data of type `P` for this class.
    pub fn with_private<P>(mut self) -> Self {
        self.private_size = mem::size_of::<P>();
        self
    }

    pub fn with_class_init(mut self, init: ClassInitFn) -> Self {
        self.class_init = Some(init);
        self
    }

    pub fn with_class_finalize(mut self, finalize: ClassFinalizeFn) -> Self {
        self.class_finalize = Some(finalize);
        self
    }

    pub fn with_instance_init(mut self, init: InstanceInitFn) -> Self {
        self.instance_init = Some(init);
        self
    }

    pub fn with_default_init(mut self, init: InterfaceInitFn) -> Self {
        self.default_init = Some(init);
        self
    }
}
