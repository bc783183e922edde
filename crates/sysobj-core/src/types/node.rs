use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::info::{ClassFinalizeFn, ClassInitFn, InstanceInitFn, InterfaceInitFn};
use super::{NodeKind, TypeId, Vtable};
use crate::class::ClassDescriptor;
use crate::param::Param;

/// Registry record of one type.
///
/// Nodes are append-only: once registered, only the class reference count,
/// the cached class descriptor and the property list change.
pub struct TypeNode {
    pub(crate) id: TypeId,
    pub(crate) name: Arc<str>,
    pub(crate) kind: NodeKind,
    /// `[self, parent, ..., fundamental root]`
    pub(crate) supers: Box<[TypeId]>,
    /// References to this type's class descriptor
    pub(crate) ref_count: AtomicUsize,
    pub(crate) data: NodeData,
}

pub(crate) enum NodeData {
    Fundamental,
    Class(ClassData),
    Interface(InterfaceData),
}

pub(crate) struct ClassData {
    pub(crate) class_size: usize,
    pub(crate) instance_size: usize,
    /// This class's own private data, already rounded up
    pub(crate) own_private_size: usize,
    /// Own private data plus every ancestor's, fixed at first use
    pub(crate) private_size: OnceCell<usize>,
    pub(crate) class_new: fn() -> Box<dyn Vtable>,
    pub(crate) class_init: ClassInitFn,
    pub(crate) class_finalize: Option<ClassFinalizeFn>,
    pub(crate) instance_init: Option<InstanceInitFn>,
    pub(crate) class: Mutex<Option<Arc<ClassDescriptor>>>,
    pub(crate) building: AtomicBool,
    /// Set while implemented interfaces hold a class reference
    pub(crate) pinned: AtomicBool,
    pub(crate) props: Mutex<Vec<Arc<Param>>>,
}

pub(crate) struct InterfaceData {
    pub(crate) vtable_size: usize,
    pub(crate) vtable_new: fn() -> Box<dyn Vtable>,
    pub(crate) default_init: InterfaceInitFn,
}

impl TypeNode {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Ancestor chain, most-derived first.
    pub fn supers(&self) -> &[TypeId] {
        &self.supers
    }

    /// Number of ancestors above this type.
    pub fn n_supers(&self) -> usize {
        self.supers.len() - 1
    }

    pub fn parent(&self) -> Option<TypeId> {
        self.supers.get(1).copied()
    }

    /// The fundamental type at the root of the chain.
    pub fn fundamental(&self) -> TypeId {
        self.supers[self.n_supers()]
    }

    /// Whether `ancestor` is this type or one of its ancestors.
    pub fn is_a(&self, ancestor: &TypeNode) -> bool {
        let (depth, ancestor_depth) = (self.n_supers(), ancestor.n_supers());
        ancestor_depth <= depth && self.supers[depth - ancestor_depth] == ancestor.id
    }

    /// Outstanding references to this type's class descriptor.
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn instance_size(&self) -> usize {
        self.class_data().map_or(0, |data| data.instance_size)
    }

    /// Class struct size, or vtable size for interfaces.
    pub fn class_size(&self) -> usize {
        match &self.data {
            NodeData::Fundamental => 0,
            NodeData::Class(data) => data.class_size,
            NodeData::Interface(data) => data.vtable_size,
        }
    }

    pub(crate) fn class_data(&self) -> Option<&ClassData> {
        match &self.data {
            NodeData::Class(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn interface_data(&self) -> Option<&InterfaceData> {
        match &self.data {
            NodeData::Interface(data) => Some(data),
            _ => None,
        }
    }
}

impl std::fmt::Debug for TypeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("supers", &self.supers)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
