//! Class descriptors
//!
//! A descriptor is built the first time its class is referenced and
//! released when the last reference goes away. Each descriptor holds a
//! reference on its parent's descriptor for its whole lifetime, so a base
//! class stays alive as long as any subclass does.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{contract_violation, RegistryError, RegistryResult};
use crate::interface::InterfaceEntry;
use crate::types::{ClassData, RegistryInner, TypeId, TypeNode, TypeRegistry, Vtable};

/// Runtime descriptor of a class: its virtual table and interface entries
pub struct ClassDescriptor {
    type_id: TypeId,
    name: Arc<str>,
    vtable: Box<dyn Vtable>,
    parent: Option<Arc<ClassDescriptor>>,
    /// Most recently implemented first
    interfaces: RwLock<Vec<Arc<InterfaceEntry>>>,
    registry: Weak<RegistryInner>,
}

impl ClassDescriptor {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The most-derived class struct.
    pub fn vtable(&self) -> &dyn Vtable {
        self.vtable.as_ref()
    }

    /// The layer of type `T` in this class's class struct.
    ///
    /// ```
    /// use sysobj_core::{ObjectClass, TypeId, TypeRegistry};
    ///
    /// let registry = TypeRegistry::new();
    /// let class = registry.class_ref(TypeId::OBJECT).unwrap();
    /// assert!(class.get::<ObjectClass>().unwrap().dclone.is_some());
    /// registry.class_unref(&class);
    /// ```
    pub fn get<T: Vtable>(&self) -> Option<&T> {
        self.vtable.find::<T>()
    }

    pub fn parent(&self) -> Option<&Arc<ClassDescriptor>> {
        self.parent.as_ref()
    }

    pub fn interfaces(&self) -> Vec<Arc<InterfaceEntry>> {
        self.interfaces.read().clone()
    }

    /// The registry that built this class, while it is alive.
    pub fn registry(&self) -> Option<TypeRegistry> {
        self.registry.upgrade().map(TypeRegistry::from_inner)
    }

    pub(crate) fn find_interface(&self, iface: TypeId) -> Option<Arc<InterfaceEntry>> {
        self.interfaces
            .read()
            .iter()
            .find(|entry| entry.iface_type() == iface)
            .cloned()
    }

    pub(crate) fn push_interface(&self, entry: Arc<InterfaceEntry>) {
        self.interfaces.write().insert(0, entry);
    }

    pub(crate) fn clear_interfaces(&self) {
        self.interfaces.write().clear();
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.type_id))
            .field("interfaces", &self.interfaces.read().len())
            .finish()
    }
}

impl TypeRegistry {
    /// Reference the class of `ty`, building it on first use.
    ///
    /// Every call adds exactly one reference; balance it with
    /// [`class_unref`](Self::class_unref).
    pub fn class_ref(&self, ty: TypeId) -> RegistryResult<Arc<ClassDescriptor>> {
        let node = self.class_node(ty)?;
        let Some(data) = node.class_data() else {
            return Err(RegistryError::NotAClass {
                name: node.name().to_string(),
            });
        };

        let _guard = self.inner.class_lock.lock();
        if let Some(class) = data.class.lock().as_ref() {
            node.ref_count.fetch_add(1, Ordering::AcqRel);
            return Ok(Arc::clone(class));
        }
        self.ensure_live()?;
        if data.building.swap(true, Ordering::AcqRel) {
            return Err(RegistryError::ClassUnderConstruction {
                name: node.name().to_string(),
            });
        }
        let built = self.build_class(&node, data);
        data.building.store(false, Ordering::Release);
        let class = built?;

        *data.class.lock() = Some(Arc::clone(&class));
        node.ref_count.store(1, Ordering::Release);
        tracing::debug!(target: "sysobj::types", class = %node.name(), "class built");
        Ok(class)
    }

    fn build_class(&self, node: &TypeNode, data: &ClassData) -> RegistryResult<Arc<ClassDescriptor>> {
        let parent = match node.parent() {
            Some(parent) => Some(self.class_ref(parent)?),
            None => None,
        };
        self.ensure_private_size(node);

        let mut vtable = (data.class_new)();
        for &ancestor in node.supers()[1..].iter().rev() {
            let Some(ancestor) = self.node(ancestor) else {
                continue;
            };
            if let Some(ancestor_data) = ancestor.class_data() {
                (ancestor_data.class_init)(vtable.as_mut());
            }
        }
        (data.class_init)(vtable.as_mut());

        Ok(Arc::new(ClassDescriptor {
            type_id: node.id(),
            name: Arc::clone(&node.name),
            vtable,
            parent,
            interfaces: RwLock::new(Vec::new()),
            registry: self.downgrade(),
        }))
    }

    /// Drop one reference to a class, releasing it at zero.
    ///
    /// Releasing runs the class-finalize hook, drops the class's interface
    /// entries and unreferences the parent class.
    pub fn class_unref(&self, class: &ClassDescriptor) {
        if self.is_torn_down() {
            return;
        }
        let Some(node) = self.node(class.type_id) else {
            contract_violation!(self.trap(), "class_unref on unknown class {}", class.name);
            return;
        };
        let Some(data) = node.class_data() else {
            return;
        };

        let _guard = self.inner.class_lock.lock();
        let current = data
            .class
            .lock()
            .as_ref()
            .is_some_and(|cached| std::ptr::eq(Arc::as_ptr(cached), class));
        if !current {
            contract_violation!(self.trap(), "class_unref on released class {}", class.name);
            return;
        }
        let count = node.ref_count.load(Ordering::Acquire);
        if count == 0 {
            contract_violation!(self.trap(), "class {} unreferenced below zero", class.name);
            return;
        }
        node.ref_count.store(count - 1, Ordering::Release);
        if count > 1 {
            return;
        }

        let Some(class) = data.class.lock().take() else {
            return;
        };
        if let Some(finalize) = data.class_finalize {
            finalize(&class);
        }
        class.clear_interfaces();
        self.inner
            .interfaces
            .lock()
            .retain(|entry| entry.instance_type() != class.type_id);
        tracing::debug!(target: "sysobj::types", class = %class.name, "class released");
        if let Some(parent) = &class.parent {
            self.class_unref(parent);
        }
    }

    /// The built class of `ty`, without adding a reference.
    pub fn class_peek(&self, ty: TypeId) -> Option<Arc<ClassDescriptor>> {
        let node = self.node(ty)?;
        let class = node.class_data()?.class.lock().clone();
        class
    }

    /// References currently held on the class of `ty`.
    pub fn class_ref_count(&self, ty: TypeId) -> usize {
        self.node(ty).map_or(0, |node| node.ref_count())
    }

    /// The built class of `ty`'s parent, without adding a reference.
    pub fn parent_class(&self, ty: TypeId) -> Option<Arc<ClassDescriptor>> {
        self.class_peek(self.parent(ty)?)
    }
}
