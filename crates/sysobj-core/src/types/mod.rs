//! Type identifiers and the type registry
//!
//! Every registered type gets a [`TypeNode`] holding its ancestor chain
//! (`supers`), most-derived first and ending at a fundamental root. The
//! chain makes ancestry a constant-time check: `a` is an ancestor of `c`
//! iff `c.supers[c.n_supers - a.n_supers] == a`.

mod info;
mod node;
mod registry;
mod vtable;

use std::fmt;

pub use info::{ClassFinalizeFn, ClassInitFn, InstanceInitFn, InterfaceInitFn, TypeInfo};
pub use node::TypeNode;
pub use registry::{TeardownReport, TypeRegistry};
pub use vtable::Vtable;

pub(crate) use node::ClassData;
pub(crate) use registry::RegistryInner;

use crate::defaults::{FUNDAMENTAL_MAX, FUNDAMENTAL_SHIFT};

/// Opaque handle of a registered type
///
/// Fundamental types use small fixed ids (`tag << 2`); every other type
/// gets an id above [`FUNDAMENTAL_MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub const FUNDAMENTAL_NODE: TypeId = TypeId::fundamental(1);
    pub const INTERFACE: TypeId = TypeId::fundamental(2);
    pub const CHAR: TypeId = TypeId::fundamental(3);
    pub const BOOL: TypeId = TypeId::fundamental(5);
    pub const INT: TypeId = TypeId::fundamental(6);
    pub const LONG: TypeId = TypeId::fundamental(7);
    pub const DOUBLE: TypeId = TypeId::fundamental(15);
    pub const STRING: TypeId = TypeId::fundamental(16);
    pub const POINTER: TypeId = TypeId::fundamental(17);
    pub const OBJECT: TypeId = TypeId::fundamental(20);

    /// Id of the fundamental type with the given tag.
    pub const fn fundamental(tag: u32) -> Self {
        TypeId(tag << FUNDAMENTAL_SHIFT)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn is_fundamental(self) -> bool {
        self.0 <= FUNDAMENTAL_MAX
    }

    pub(crate) fn fundamental_tag(self) -> Option<usize> {
        self.is_fundamental()
            .then_some((self.0 >> FUNDAMENTAL_SHIFT) as usize)
    }

    pub(crate) fn from_slot(slot: usize) -> Self {
        TypeId(FUNDAMENTAL_MAX + ((slot as u32 + 1) << FUNDAMENTAL_SHIFT))
    }

    pub(crate) fn slot(self) -> Option<usize> {
        if self.is_fundamental() {
            return None;
        }
        (((self.0 - FUNDAMENTAL_MAX) >> FUNDAMENTAL_SHIFT) as usize).checked_sub(1)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a type node describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Scalar marker type with no class
    Fundamental,
    /// Instantiable class
    BaseClass,
    /// Class that only exists to be derived from
    AbstractClass,
    Interface,
}

impl NodeKind {
    pub fn is_class(self) -> bool {
        matches!(self, NodeKind::BaseClass | NodeKind::AbstractClass)
    }

    pub fn is_interface(self) -> bool {
        self == NodeKind::Interface
    }
}
