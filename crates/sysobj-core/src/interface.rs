//! Interfaces
//!
//! An interface is a vtable type registered under the root `Interface`
//! type. Implementing it for a class builds one vtable, runs the default
//! slots of every interface in its chain and then the implementer's own
//! init, and attaches the result to the class.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::{RegistryError, RegistryResult};
use crate::impl_vtable;
use crate::instance::Instance;
use crate::types::{InterfaceInitFn, TypeId, TypeRegistry, Vtable};

/// Root layer of every interface vtable
#[derive(Debug)]
pub struct TypeInterface {
    /// The interface this vtable implements
    pub type_id: TypeId,
}

impl Default for TypeInterface {
    fn default() -> Self {
        Self {
            type_id: TypeId::INTERFACE,
        }
    }
}

impl_vtable!(TypeInterface);

pub(crate) fn interface_default_init(_vtable: &mut dyn Vtable) {}

/// One class's implementation of one interface
pub struct InterfaceEntry {
    iface_type: TypeId,
    instance_type: TypeId,
    vtable: Box<dyn Vtable>,
}

impl InterfaceEntry {
    pub fn iface_type(&self) -> TypeId {
        self.iface_type
    }

    /// The class that implements the interface.
    pub fn instance_type(&self) -> TypeId {
        self.instance_type
    }

    pub fn vtable(&self) -> &dyn Vtable {
        self.vtable.as_ref()
    }

    /// The layer of type `V` in the interface vtable.
    pub fn get<V: Vtable>(&self) -> Option<&V> {
        self.vtable.find::<V>()
    }
}

impl fmt::Debug for InterfaceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceEntry")
            .field("iface_type", &self.iface_type)
            .field("instance_type", &self.instance_type)
            .finish()
    }
}

impl TypeRegistry {
    /// Attach an implementation of `iface_type` to the class `instance_type`.
    ///
    /// The class is built if needed and stays referenced until teardown.
    /// A subclass may implement an interface its parent already implements;
    /// the subclass entry is found first.
    pub fn implement_interface(
        &self,
        instance_type: TypeId,
        iface_type: TypeId,
        init: InterfaceInitFn,
    ) -> RegistryResult<()> {
        self.ensure_live()?;
        let class_node = self.class_node(instance_type)?;
        let iface_node = self
            .node(iface_type)
            .ok_or(RegistryError::UnknownType(iface_type))?;
        let Some(iface_data) = iface_node.interface_data() else {
            return Err(RegistryError::NotAnInterface {
                name: iface_node.name().to_string(),
            });
        };

        let mut vtable = (iface_data.vtable_new)();
        if let Some(header) = vtable.find_mut::<TypeInterface>() {
            header.type_id = iface_type;
        }
        for &ancestor in iface_node.supers().iter().rev() {
            let default_init = self
                .node(ancestor)
                .and_then(|ancestor| ancestor.interface_data().map(|data| data.default_init));
            if let Some(default_init) = default_init {
                default_init(vtable.as_mut());
            }
        }
        init(vtable.as_mut());

        let class = self.class_ref(instance_type)?;
        if class.find_interface(iface_type).is_some() {
            self.class_unref(&class);
            let err = RegistryError::DuplicateInterface {
                name: class_node.name().to_string(),
                interface: iface_node.name().to_string(),
            };
            tracing::error!(target: "sysobj::types", "{err}");
            return Err(err);
        }

        let entry = Arc::new(InterfaceEntry {
            iface_type,
            instance_type,
            vtable,
        });
        class.push_interface(Arc::clone(&entry));
        self.inner.interfaces.lock().push(entry);

        let already_pinned = class_node
            .class_data()
            .is_some_and(|data| data.pinned.swap(true, Ordering::AcqRel));
        if already_pinned {
            self.class_unref(&class);
        }
        tracing::debug!(
            target: "sysobj::types",
            class = %class_node.name(),
            interface = %iface_node.name(),
            "interface implemented"
        );
        Ok(())
    }

    /// The entry implementing `iface` for `ty` or its nearest ancestor.
    ///
    /// Falls back to an implementation of an interface derived from
    /// `iface`. `None` means the capability is absent, which is not an
    /// error.
    pub fn get_interface(&self, ty: TypeId, iface: TypeId) -> Option<Arc<InterfaceEntry>> {
        let node = self.node(ty)?;
        for &ancestor in node.supers() {
            let entry = self
                .class_peek(ancestor)
                .and_then(|class| class.find_interface(iface));
            if entry.is_some() {
                return entry;
            }
        }
        for &ancestor in node.supers() {
            let Some(class) = self.class_peek(ancestor) else {
                continue;
            };
            let derived = class
                .interfaces()
                .into_iter()
                .find(|entry| self.type_is_a(entry.iface_type(), iface));
            if derived.is_some() {
                return derived;
            }
        }
        tracing::debug!(target: "sysobj::types", %ty, %iface, "interface not implemented");
        None
    }

    /// [`get_interface`](Self::get_interface) for an instance's type.
    pub fn instance_get_interface(
        &self,
        instance: Instance,
        iface: TypeId,
    ) -> Option<Arc<InterfaceEntry>> {
        self.get_interface(instance.type_id(), iface)
    }

    /// Interfaces implemented directly by the class `ty`, newest first.
    pub fn type_interfaces(&self, ty: TypeId) -> Vec<TypeId> {
        self.class_peek(ty).map_or_else(Vec::new, |class| {
            class
                .interfaces()
                .iter()
                .map(|entry| entry.iface_type())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Object, ObjectClass, TypeInfo};

    #[derive(Default)]
    struct NamedIface {
        parent: TypeInterface,
        name: Option<fn() -> &'static str>,
    }
    impl_vtable!(NamedIface, parent);

    #[derive(Default)]
    struct ThingClass {
        parent: ObjectClass,
    }
    impl_vtable!(ThingClass, parent);

    fn thing_class_init(_class: &mut dyn Vtable) {}

    fn named_default_init(vtable: &mut dyn Vtable) {
        if let Some(named) = vtable.find_mut::<NamedIface>() {
            named.name = Some(|| "anonymous");
        }
    }

    fn thing_named_init(vtable: &mut dyn Vtable) {
        if let Some(named) = vtable.find_mut::<NamedIface>() {
            named.name = Some(|| "thing");
        }
    }

    fn setup(registry: &TypeRegistry) -> (TypeId, TypeId) {
        let named = registry
            .register_type(
                TypeId::INTERFACE,
                TypeInfo::interface::<NamedIface>("Named").with_default_init(named_default_init),
            )
            .unwrap();
        let thing = registry
            .register_type(
                TypeId::OBJECT,
                TypeInfo::class::<ThingClass, Object>("Thing").with_class_init(thing_class_init),
            )
            .unwrap();
        (named, thing)
    }

    #[test]
    fn test_entry_header_names_interface() {
        let registry = TypeRegistry::new();
        let (named, thing) = setup(&registry);
        registry
            .implement_interface(thing, named, thing_named_init)
            .unwrap();

        let entry = registry.get_interface(thing, named).unwrap();
        assert_eq!(entry.instance_type(), thing);
        assert_eq!(entry.get::<TypeInterface>().unwrap().type_id, named);
        assert_eq!((entry.get::<NamedIface>().unwrap().name.unwrap())(), "thing");
        assert_eq!(registry.type_interfaces(thing), vec![named]);
    }

    #[test]
    fn test_default_init_runs_before_implementer() {
        let registry = TypeRegistry::new();
        let (named, thing) = setup(&registry);
        registry
            .implement_interface(thing, named, interface_default_init)
            .unwrap();
        let entry = registry.get_interface(thing, named).unwrap();
        assert_eq!((entry.get::<NamedIface>().unwrap().name.unwrap())(), "anonymous");
    }

    #[test]
    fn test_implementing_pins_class_once() {
        let registry = TypeRegistry::new();
        let (named, thing) = setup(&registry);
        let other = registry
            .register_type(
                TypeId::INTERFACE,
                TypeInfo::interface::<TypeInterface>("Other")
                    .with_default_init(interface_default_init),
            )
            .unwrap();
        registry
            .implement_interface(thing, named, thing_named_init)
            .unwrap();
        registry
            .implement_interface(thing, other, interface_default_init)
            .unwrap();
        assert_eq!(registry.class_ref_count(thing), 1);
        assert_eq!(registry.type_interfaces(thing), vec![other, named]);

        let report = registry.teardown();
        assert_eq!(report.pinned_classes, 1);
        assert_eq!(report.interface_entries, 2);
        assert!(report.leaked_classes.is_empty());
    }

    #[test]
    fn test_non_interface_rejected() {
        let registry = TypeRegistry::new();
        let (_, thing) = setup(&registry);
        assert!(matches!(
            registry.implement_interface(thing, TypeId::OBJECT, interface_default_init),
            Err(RegistryError::NotAnInterface { .. })
        ));
    }
}
