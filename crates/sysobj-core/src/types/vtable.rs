//! Layered virtual tables.
//!
//! A class struct embeds its parent's class struct as a field, the same
//! way an instance struct embeds its parent instance struct. Class-init
//! hooks receive the most-derived struct as `&mut dyn Vtable` and reach
//! the layer they know about with [`find_mut`](dyn Vtable::find_mut), so
//! each ancestor only writes its own slots and descendants overwrite them
//! afterwards. Interface vtables are layered the same way.

use std::any::Any;

/// A struct of overridable slots, optionally extending a parent struct.
///
/// Implement with [`impl_vtable!`](crate::impl_vtable).
pub trait Vtable: Any + Send + Sync + 'static {
    /// The embedded parent layer, if any
    fn parent(&self) -> Option<&(dyn Vtable + 'static)>;
    fn parent_mut(&mut self) -> Option<&mut (dyn Vtable + 'static)>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Vtable {
    /// The layer of type `T`, searching from this layer towards the root.
    pub fn find<T: Vtable>(&self) -> Option<&T> {
        match self.as_any().downcast_ref::<T>() {
            Some(layer) => Some(layer),
            None => self.parent()?.find::<T>(),
        }
    }

    pub fn find_mut<T: Vtable>(&mut self) -> Option<&mut T> {
        if self.as_any().is::<T>() {
            return self.as_any_mut().downcast_mut::<T>();
        }
        self.parent_mut()?.find_mut::<T>()
    }

    /// Number of layers, counting this one.
    pub fn depth(&self) -> usize {
        1 + self.parent().map_or(0, |parent| parent.depth())
    }
}

/// Implement [`Vtable`] for a struct.
///
/// The one-argument form declares a root layer; the two-argument form
/// names the field that holds the parent layer.
///
/// ```
/// use sysobj_core::{impl_vtable, ObjectClass, Vtable};
///
/// #[derive(Default)]
/// struct ShapeClass {
///     parent: ObjectClass,
///     sides: Option<fn() -> u32>,
/// }
/// impl_vtable!(ShapeClass, parent);
///
/// let mut class: Box<dyn Vtable> = Box::<ShapeClass>::default();
/// assert!(class.find_mut::<ObjectClass>().is_some());
/// assert_eq!(class.depth(), 2);
/// ```
#[macro_export]
macro_rules! impl_vtable {
    ($ty:ty) => {
        impl $crate::Vtable for $ty {
            fn parent(&self) -> Option<&(dyn $crate::Vtable + 'static)> {
                None
            }
            fn parent_mut(&mut self) -> Option<&mut (dyn $crate::Vtable + 'static)> {
                None
            }
            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
    ($ty:ty, $parent:ident) => {
        impl $crate::Vtable for $ty {
            fn parent(&self) -> Option<&(dyn $crate::Vtable + 'static)> {
                Some(&self.$parent)
            }
            fn parent_mut(&mut self) -> Option<&mut (dyn $crate::Vtable + 'static)> {
                Some(&mut self.$parent)
            }
            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Base {
        a: u32,
    }
    crate::impl_vtable!(Base);

    #[derive(Default)]
    struct Middle {
        parent: Base,
        b: u32,
    }
    crate::impl_vtable!(Middle, parent);

    #[derive(Default)]
    struct Leaf {
        parent: Middle,
    }
    crate::impl_vtable!(Leaf, parent);

    #[test]
    fn test_find_walks_to_root() {
        let mut leaf: Box<dyn Vtable> = Box::<Leaf>::default();
        leaf.find_mut::<Base>().unwrap().a = 7;
        leaf.find_mut::<Middle>().unwrap().b = 9;
        assert_eq!(leaf.find::<Base>().unwrap().a, 7);
        assert_eq!(leaf.find::<Middle>().unwrap().b, 9);
        assert_eq!(leaf.depth(), 3);
    }

    #[test]
    fn test_find_missing_layer() {
        let base: Box<dyn Vtable> = Box::<Base>::default();
        assert!(base.find::<Leaf>().is_none());
    }
}
