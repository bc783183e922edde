//! The `Object` base class.
//!
//! Objects are reference counted through their instance header. When the
//! last reference goes the class's `dispose` hook runs, then `finalize`,
//! then the memory and class reference are released. Overrides chain to
//! their parent's hook with [`chain_dispose`] and [`chain_finalize`].
//!
//! Under the mark-sweep strategy an object handed to the collector with
//! [`TypeRegistry::track_auto`] is reclaimed when no root reaches it; the
//! sweep runs the same hooks.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use sysobj_gc::{Collector, Rooted, Strategy, TrackMode};

use crate::class::ClassDescriptor;
use crate::defaults::MAX_REF_COUNT;
use crate::error::{contract_violation, RegistryError, RegistryResult};
use crate::impl_vtable;
use crate::instance::{Instance, InstanceHeader};
use crate::types::{TypeId, TypeInfo, TypeRegistry, Vtable};

/// Instance struct of `Object`; the first field of every object struct
#[repr(C)]
pub struct Object {
    header: InstanceHeader,
}

impl Object {
    pub fn type_id(&self) -> TypeId {
        self.header.type_id
    }

    pub fn ref_count(&self) -> i32 {
        self.header.ref_count.load(Ordering::Acquire)
    }
}

/// Class struct of `Object`
#[derive(Default)]
pub struct ObjectClass {
    /// Drop references to other objects. May run more than once.
    pub dispose: Option<fn(Instance)>,
    /// Release the instance's own resources. Runs once.
    pub finalize: Option<fn(Instance)>,
    /// Build a copy; defaults to a fresh instance of the same type.
    pub dclone: Option<fn(Instance) -> Option<Instance>>,
}

impl_vtable!(ObjectClass);

fn object_class_init(class: &mut dyn Vtable) {
    if let Some(object) = class.find_mut::<ObjectClass>() {
        object.dispose = Some(object_dispose);
        object.finalize = Some(object_finalize);
        object.dclone = Some(object_dclone);
    }
}

fn object_dispose(_obj: Instance) {}

fn object_finalize(_obj: Instance) {}

fn object_dclone(obj: Instance) -> Option<Instance> {
    let registry = obj.registry()?;
    registry.object_new(obj.type_id()).ok()
}

pub(crate) fn object_type_info() -> TypeInfo {
    TypeInfo::class::<ObjectClass, Object>("Object").with_class_init(object_class_init)
}

fn object_class(obj: &Instance) -> Option<&ObjectClass> {
    obj.class()?.get::<ObjectClass>()
}

/// The `ObjectClass` slot of `defining`'s parent class, as seen from `obj`.
fn parent_slot<F>(
    defining: TypeId,
    obj: &Instance,
    slot: impl Fn(&ObjectClass) -> Option<F>,
) -> Option<F> {
    let mut class: &ClassDescriptor = obj.class()?;
    while class.type_id() != defining {
        class = class.parent()?.as_ref();
    }
    slot(class.parent()?.get::<ObjectClass>()?)
}

/// Run the parent class's `dispose` from an override defined by `defining`.
///
/// ```
/// use sysobj_core::{chain_dispose, Instance, TypeId};
///
/// fn widget_dispose(obj: Instance) {
///     // release this level's references, then:
///     chain_dispose(TypeId::OBJECT, obj);
/// }
/// ```
pub fn chain_dispose(defining: TypeId, obj: Instance) {
    if let Some(dispose) = parent_slot(defining, &obj, |class| class.dispose) {
        dispose(obj);
    }
}

/// Run the parent class's `finalize` from an override defined by `defining`.
pub fn chain_finalize(defining: TypeId, obj: Instance) {
    if let Some(finalize) = parent_slot(defining, &obj, |class| class.finalize) {
        finalize(obj);
    }
}

/// Sweep finalizer for mark-sweep instances; `ptr` is the instance pointer.
///
/// Runs the object hooks and releases the class. The collector frees the
/// memory afterwards.
pub(crate) unsafe fn sweep_instance(ptr: NonNull<u8>) {
    let obj = Instance::from_raw(ptr);
    if obj.ref_count_cell().swap(0, Ordering::AcqRel) <= 0 {
        return;
    }
    if let Some(class) = object_class(&obj) {
        let (dispose, finalize) = (class.dispose, class.finalize);
        if let Some(dispose) = dispose {
            dispose(obj);
        }
        if let Some(finalize) = finalize {
            finalize(obj);
        }
    }

    let header = ptr.cast::<InstanceHeader>().as_ptr();
    let class_ptr = (*header).class;
    if class_ptr.is_null() {
        return;
    }
    (*header).class = ptr::null();
    let class = Arc::from_raw(class_ptr);
    tracing::trace!(target: "sysobj::object", class = %class.name(), "instance swept");
    if let Some(registry) = class.registry() {
        registry.class_unref(&class);
    }
}

impl TypeRegistry {
    /// Create an object of `ty`, which must derive from `Object`.
    pub fn object_new(&self, ty: TypeId) -> RegistryResult<Instance> {
        let name = self.type_name(ty).ok_or(RegistryError::UnknownType(ty))?;
        if !self.type_is_a(ty, TypeId::OBJECT) {
            return Err(RegistryError::NotAnObject {
                name: name.to_string(),
            });
        }
        self.instance_create(ty)
    }

    fn check_ref_count(&self, obj: Instance, op: &str, count: i32) -> bool {
        if count <= 0 || count >= MAX_REF_COUNT {
            contract_violation!(
                self.trap(),
                "{op} on invalid object {:p} (ref count {count})",
                obj.as_ptr()
            );
            return false;
        }
        true
    }

    fn update_ref_count(&self, obj: Instance, op: &str, delta: i32) -> Option<i32> {
        let cell: &AtomicI32 = obj.ref_count_cell();
        let mut current = cell.load(Ordering::Acquire);
        loop {
            if !self.check_ref_count(obj, op, current) {
                return None;
            }
            match cell.compare_exchange_weak(
                current,
                current + delta,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return Some(previous),
                Err(actual) => current = actual,
            }
        }
    }

    /// Add a reference. `None` if the object is already destroyed.
    pub fn object_ref(&self, obj: Instance) -> Option<Instance> {
        self.update_ref_count(obj, "object_ref", 1).map(|_| obj)
    }

    /// Drop a reference, destroying the object at zero.
    ///
    /// Returns whether the object was destroyed. `obj` must have been
    /// created by this registry.
    pub fn object_unref(&self, obj: Instance) -> bool {
        match self.update_ref_count(obj, "object_unref", -1) {
            Some(1) => {
                self.object_release(obj);
                true
            }
            _ => false,
        }
    }

    fn object_release(&self, obj: Instance) {
        let hooks = object_class(&obj).map(|class| (class.dispose, class.finalize));
        if let Some((dispose, finalize)) = hooks {
            if let Some(dispose) = dispose {
                dispose(obj);
            }
            if let Some(finalize) = finalize {
                finalize(obj);
            }
        }
        // SAFETY: the last reference is gone.
        unsafe { self.instance_free(obj) };
    }

    /// Run `dispose` now, then drop the caller's reference.
    pub fn object_destroy(&self, obj: Instance) -> bool {
        if !self.check_ref_count(obj, "object_destroy", obj.ref_count()) {
            return false;
        }
        if let Some(dispose) = object_class(&obj).and_then(|class| class.dispose) {
            dispose(obj);
        }
        self.object_unref(obj)
    }

    /// Copy an object through its class's `dclone` hook.
    pub fn object_dclone(&self, obj: Instance) -> Option<Instance> {
        let dclone = object_class(&obj)?.dclone?;
        dclone(obj)
    }

    pub fn object_is_a(&self, obj: Instance, ty: TypeId) -> bool {
        self.type_is_a(obj.type_id(), ty)
    }

    pub fn object_type_name(&self, obj: Instance) -> Option<Arc<str>> {
        self.type_name(obj.type_id())
    }

    /// Checked downcast.
    ///
    /// Passes `None` through. For interface targets the object's type must
    /// implement the interface. A failed cast is a contract violation and
    /// returns `None`. Objects whose reference count is zero are being
    /// destroyed and pass unchecked.
    pub fn cast_check(&self, obj: Option<Instance>, ty: TypeId) -> Option<Instance> {
        let obj = obj?;
        if obj.ref_count() == 0 {
            return Some(obj);
        }
        let valid = if self.is_interface(ty) {
            self.get_interface(obj.type_id(), ty).is_some()
        } else {
            self.type_is_a(obj.type_id(), ty)
        };
        if valid {
            return Some(obj);
        }
        contract_violation!(
            self.trap(),
            "invalid cast from {} to {}",
            self.type_name(obj.type_id()).as_deref().unwrap_or("<unknown>"),
            self.type_name(ty).as_deref().unwrap_or("<unknown>")
        );
        None
    }

    /// Checked class downcast.
    pub fn class_cast_check(&self, class: &ClassDescriptor, ty: TypeId) -> bool {
        if self.type_is_a(class.type_id(), ty) {
            return true;
        }
        contract_violation!(
            self.trap(),
            "invalid class cast from {} to {}",
            class.name(),
            self.type_name(ty).as_deref().unwrap_or("<unknown>")
        );
        false
    }

    /// Let the mark-sweep collector reclaim `obj` once no root reaches it.
    ///
    /// Only meaningful under [`Strategy::MarkSweep`].
    pub fn track_auto(&self, obj: Instance) -> bool {
        if self.strategy() != Strategy::MarkSweep {
            tracing::warn!(target: "sysobj::object", "track_auto needs the mark-sweep strategy");
            return false;
        }
        let block = self.block_start(obj);
        // SAFETY: the block was allocated by the global collector.
        match unsafe { Collector::global().set_track(block, TrackMode::Auto) } {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target: "sysobj::object", "track_auto failed: {e}");
                false
            }
        }
    }

    /// Root `obj` for the guard's lifetime.
    ///
    /// The guard holds the address of the object's block, not the instance
    /// pointer.
    pub fn root_instance(&self, obj: Instance, name: &'static str) -> Rooted {
        Rooted::with(name, self.block_start(obj))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    thread_local! {
        static DISPOSED: Cell<u32> = const { Cell::new(0) };
        static FINALIZED: Cell<u32> = const { Cell::new(0) };
        static NOTE: Cell<TypeId> = const { Cell::new(TypeId::OBJECT) };
    }

    #[derive(Default)]
    struct NoteClass {
        parent: ObjectClass,
    }
    impl_vtable!(NoteClass, parent);

    #[repr(C)]
    struct Note {
        parent: Object,
        pages: u32,
    }

    fn note_dispose(obj: Instance) {
        DISPOSED.with(|c| c.set(c.get() + 1));
        chain_dispose(NOTE.with(Cell::get), obj);
    }

    fn note_finalize(obj: Instance) {
        FINALIZED.with(|c| c.set(c.get() + 1));
        chain_finalize(NOTE.with(Cell::get), obj);
    }

    fn note_class_init(class: &mut dyn Vtable) {
        if let Some(object) = class.find_mut::<ObjectClass>() {
            object.dispose = Some(note_dispose);
            object.finalize = Some(note_finalize);
        }
    }

    fn register_note(registry: &TypeRegistry) -> TypeId {
        let note = registry
            .register_type(
                TypeId::OBJECT,
                TypeInfo::class::<NoteClass, Note>("Note").with_class_init(note_class_init),
            )
            .unwrap();
        NOTE.with(|c| c.set(note));
        DISPOSED.with(|c| c.set(0));
        FINALIZED.with(|c| c.set(0));
        note
    }

    #[test]
    fn test_unref_runs_hooks_once() {
        let registry = TypeRegistry::new();
        let note = register_note(&registry);
        let obj = registry.object_new(note).unwrap();
        assert_eq!(unsafe { obj.data::<Object>() }.type_id(), note);

        assert!(registry.object_ref(obj).is_some());
        assert!(!registry.object_unref(obj));
        assert_eq!(FINALIZED.with(Cell::get), 0);
        assert!(registry.object_unref(obj));
        assert_eq!(DISPOSED.with(Cell::get), 1);
        assert_eq!(FINALIZED.with(Cell::get), 1);
        assert_eq!(registry.class_ref_count(note), 0);
    }

    #[test]
    fn test_destroy_disposes_first() {
        let registry = TypeRegistry::new();
        let note = register_note(&registry);
        let obj = registry.object_new(note).unwrap();
        registry.object_ref(obj);

        assert!(!registry.object_destroy(obj));
        assert_eq!(DISPOSED.with(Cell::get), 1);
        assert_eq!(FINALIZED.with(Cell::get), 0);
        assert!(registry.object_destroy(obj));
        assert_eq!(DISPOSED.with(Cell::get), 3);
        assert_eq!(FINALIZED.with(Cell::get), 1);
    }

    #[test]
    fn test_default_dclone_makes_fresh_instance() {
        let registry = TypeRegistry::new();
        let note = register_note(&registry);
        let obj = registry.object_new(note).unwrap();
        unsafe { obj.data_mut::<Note>().pages = 12 };

        let copy = registry.object_dclone(obj).unwrap();
        assert_ne!(copy, obj);
        assert_eq!(copy.type_id(), note);
        assert_eq!(unsafe { copy.data::<Note>() }.pages, 0);
        assert_eq!(registry.class_ref_count(note), 2);
        registry.object_unref(copy);
        registry.object_unref(obj);
    }

    #[test]
    fn test_fundamentals_are_not_objects() {
        let registry = TypeRegistry::new();
        assert!(matches!(
            registry.object_new(TypeId::DOUBLE),
            Err(RegistryError::NotAnObject { .. })
        ));
    }

    #[test]
    fn test_cast_check() {
        let registry = TypeRegistry::new();
        let note = register_note(&registry);
        let obj = registry.object_new(note).unwrap();
        assert_eq!(registry.cast_check(Some(obj), TypeId::OBJECT), Some(obj));
        assert_eq!(registry.cast_check(Some(obj), TypeId::INT), None);
        assert_eq!(registry.cast_check(None, note), None);
        assert_eq!(registry.object_type_name(obj).as_deref(), Some("Note"));
        registry.object_unref(obj);
    }
}
