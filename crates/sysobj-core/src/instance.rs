//! Instance allocation.
//!
//! An instance is one block from the registry's strategy table holding the
//! private data of every class in the chain followed by the public
//! instance struct. The [`Instance`] handle points at the public part.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use sysobj_gc::{BlockFinalizer, Collector, Strategy};

use crate::class::ClassDescriptor;
use crate::error::{contract_violation, RegistryError, RegistryResult};
use crate::object;
use crate::types::{NodeKind, TypeId, TypeRegistry};

/// Header at the start of every instance struct
///
/// Reached through [`Object`](crate::Object), which embeds it as its only
/// field.
#[repr(C)]
pub struct InstanceHeader {
    pub(crate) class: *const ClassDescriptor,
    pub(crate) type_id: TypeId,
    pub(crate) ref_count: AtomicI32,
}

/// Handle to a live instance
///
/// A plain pointer: copying it takes no reference, and it must not be used
/// after the instance has been freed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Instance(NonNull<InstanceHeader>);

// SAFETY: the header fields shared between threads are atomic or immutable
// after creation; payload synchronization is up to the class.
unsafe impl Send for Instance {}
unsafe impl Sync for Instance {}

impl Instance {
    /// # Safety
    /// `ptr` must point at the instance struct of a live instance.
    pub unsafe fn from_raw(ptr: NonNull<u8>) -> Self {
        Instance(ptr.cast())
    }

    pub fn as_ptr(self) -> NonNull<u8> {
        self.0.cast()
    }

    fn header(&self) -> &InstanceHeader {
        // SAFETY: handles only exist for allocated instances.
        unsafe { self.0.as_ref() }
    }

    pub fn type_id(self) -> TypeId {
        self.header().type_id
    }

    /// The instance's class; `None` once a sweep has released it.
    pub fn class(&self) -> Option<&ClassDescriptor> {
        // SAFETY: the instance holds a reference on its class while set.
        unsafe { self.header().class.as_ref() }
    }

    pub fn ref_count(self) -> i32 {
        self.header().ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn ref_count_cell(&self) -> &AtomicI32 {
        &self.header().ref_count
    }

    pub fn registry(&self) -> Option<TypeRegistry> {
        self.class()?.registry()
    }

    /// Address `offset` bytes from the instance pointer.
    pub fn private_at(self, offset: isize) -> NonNull<u8> {
        let ptr = self.as_ptr().as_ptr().wrapping_offset(offset);
        NonNull::new(ptr).unwrap_or(self.as_ptr())
    }

    /// Private data at an offset returned by
    /// [`TypeRegistry::private_offset`].
    ///
    /// # Safety
    /// `offset` must belong to a class this instance is an instance of, and
    /// `P` must be that class's private type.
    pub unsafe fn private<'a, P>(self, offset: isize) -> &'a mut P {
        &mut *self.private_at(offset).cast::<P>().as_ptr()
    }

    /// The instance struct as `T`.
    ///
    /// # Safety
    /// `T` must be the instance struct of this instance's type or of one of
    /// its ancestors.
    pub unsafe fn data<'a, T>(self) -> &'a T {
        &*self.0.cast::<T>().as_ptr()
    }

    /// # Safety
    /// Same as [`data`](Self::data), and no other reference to the
    /// instance struct may be live.
    pub unsafe fn data_mut<'a, T>(self) -> &'a mut T {
        &mut *self.0.cast::<T>().as_ptr()
    }
}

impl TypeRegistry {
    /// Allocate an instance of `ty` with a reference count of one.
    ///
    /// References the class, zeroes the block and runs every instance-init
    /// hook from the root class down to `ty`.
    pub fn instance_create(&self, ty: TypeId) -> RegistryResult<Instance> {
        self.ensure_live()?;
        let node = self.class_node(ty)?;
        if node.kind() == NodeKind::AbstractClass {
            return Err(RegistryError::AbstractInstantiation {
                name: node.name().to_string(),
            });
        }
        let class = self.class_ref(ty)?;
        let private_size = self.ensure_private_size(&node);
        let size = private_size + node.instance_size();

        let Some(block) = (self.strategy().vtable().malloc)(size) else {
            self.class_unref(&class);
            return Err(RegistryError::OutOfMemory { size });
        };
        // SAFETY: the block holds `size` zeroed bytes and `private_size` is
        // a multiple of the block alignment, so the header is aligned.
        let instance = unsafe {
            let header = block.as_ptr().add(private_size).cast::<InstanceHeader>();
            header.write(InstanceHeader {
                class: Arc::into_raw(class),
                type_id: ty,
                ref_count: AtomicI32::new(1),
            });
            Instance(NonNull::new_unchecked(header))
        };

        if self.strategy() == Strategy::MarkSweep {
            let finalizer = BlockFinalizer {
                func: object::sweep_instance,
                offset: private_size,
            };
            // SAFETY: the block was just allocated by the global collector.
            if let Err(e) = unsafe { Collector::global().set_finalizer(block, Some(finalizer)) } {
                tracing::warn!(target: "sysobj::object", "no sweep finalizer for {}: {e}", node.name());
            }
        }

        for &ancestor in node.supers().iter().rev() {
            let init = self
                .node(ancestor)
                .and_then(|ancestor| ancestor.class_data().and_then(|data| data.instance_init));
            if let Some(init) = init {
                init(instance);
            }
        }
        tracing::trace!(target: "sysobj::object", class = %node.name(), size, "instance created");
        Ok(instance)
    }

    /// Release an instance's memory and its class reference.
    ///
    /// No hooks run; [`object_unref`](Self::object_unref) is the usual way
    /// to get here.
    ///
    /// # Safety
    /// `instance` must come from [`instance_create`](Self::instance_create)
    /// on this registry and must not be used afterwards.
    pub unsafe fn instance_free(&self, instance: Instance) {
        let header = instance.0.as_ptr();
        let class_ptr = (*header).class;
        if class_ptr.is_null() {
            contract_violation!(self.trap(), "instance_free on an instance without a class");
            return;
        }
        (*header).class = ptr::null();
        let class = Arc::from_raw(class_ptr);
        let block = self.block_start_of(instance, class.type_id());
        (self.strategy().vtable().free)(block);
        self.class_unref(&class);
    }

    /// Bytes allocated for each instance of `ty`, private data included.
    pub fn instance_get_size(&self, ty: TypeId) -> Option<usize> {
        Some(self.private_size(ty)? + self.instance_size(ty)?)
    }

    /// Start of the private data `ty` declared, inside `instance`.
    ///
    /// `None` when `instance` is not an instance of `ty`.
    pub fn get_private(&self, instance: Instance, ty: TypeId) -> Option<NonNull<u8>> {
        if !self.type_is_a(instance.type_id(), ty) {
            return None;
        }
        Some(instance.private_at(self.private_offset(ty)?))
    }

    /// Address of the block holding `instance`.
    pub(crate) fn block_start(&self, instance: Instance) -> NonNull<u8> {
        self.block_start_of(instance, instance.type_id())
    }

    fn block_start_of(&self, instance: Instance, ty: TypeId) -> NonNull<u8> {
        let private_size = self.private_size(ty).unwrap_or(0);
        instance.private_at(-(private_size as isize))
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;
    use crate::{impl_vtable, Object, ObjectClass, TypeInfo, Vtable};

    #[derive(Default)]
    struct PointClass {
        parent: ObjectClass,
    }
    impl_vtable!(PointClass, parent);

    #[repr(C)]
    struct Point {
        parent: Object,
        x: i32,
        y: i32,
    }

    struct PointPrivate {
        tag: u64,
    }

    fn point_class_init(_class: &mut dyn Vtable) {}

    fn point_init(instance: Instance) {
        // SAFETY: only ever run on Point instances.
        let point = unsafe { instance.data_mut::<Point>() };
        point.x = 3;
        point.y = 4;
    }

    fn register_point(registry: &TypeRegistry) -> TypeId {
        registry
            .register_type(
                TypeId::OBJECT,
                TypeInfo::class::<PointClass, Point>("Point")
                    .with_class_init(point_class_init)
                    .with_private::<PointPrivate>()
                    .with_instance_init(point_init),
            )
            .unwrap()
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(mem::size_of::<InstanceHeader>(), 16);
    }

    #[test]
    fn test_create_runs_instance_init() {
        let registry = TypeRegistry::new();
        let point = register_point(&registry);
        let instance = registry.instance_create(point).unwrap();

        assert_eq!(instance.type_id(), point);
        assert_eq!(instance.ref_count(), 1);
        assert_eq!(instance.class().unwrap().type_id(), point);
        let data = unsafe { instance.data::<Point>() };
        assert_eq!((data.x, data.y), (3, 4));
        assert_eq!(registry.class_ref_count(point), 1);

        unsafe { registry.instance_free(instance) };
        assert_eq!(registry.class_ref_count(point), 0);
    }

    #[test]
    fn test_private_region_precedes_instance() {
        let registry = TypeRegistry::new();
        let point = register_point(&registry);
        assert_eq!(registry.private_offset(point), Some(-16));
        assert_eq!(registry.instance_get_size(point), Some(16 + mem::size_of::<Point>()));

        let instance = registry.instance_create(point).unwrap();
        let offset = registry.private_offset(point).unwrap();
        unsafe {
            instance.private::<PointPrivate>(offset).tag = 0xfeed;
            assert_eq!(instance.private::<PointPrivate>(offset).tag, 0xfeed);
        }
        let private = registry.get_private(instance, point).unwrap();
        assert_eq!(private, instance.private_at(-16));
        assert!(registry.get_private(instance, TypeId::INT).is_none());
        unsafe { registry.instance_free(instance) };
    }

    #[test]
    fn test_abstract_class_not_instantiable() {
        let registry = TypeRegistry::new();
        let base = registry
            .register_type(
                TypeId::OBJECT,
                TypeInfo::class::<PointClass, Point>("AbstractPoint")
                    .with_class_init(point_class_init)
                    .abstract_class(),
            )
            .unwrap();
        assert!(matches!(
            registry.instance_create(base),
            Err(RegistryError::AbstractInstantiation { .. })
        ));
        assert_eq!(registry.class_ref_count(base), 0);
    }
}
