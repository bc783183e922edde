//! Named, typed fields of an instance struct.
//!
//! A property is a field of the public instance struct at a fixed byte
//! offset. Properties are declared per class and found on the instance's
//! own type first, then on its ancestors.

use std::mem;
use std::sync::Arc;

use crate::error::PropertyError;
use crate::instance::{Instance, InstanceHeader};
use crate::types::{TypeId, TypeRegistry};
use crate::value::{Value, ValueKind};

/// A declared property
#[derive(Debug)]
pub struct Param {
    owner: TypeId,
    owner_name: Arc<str>,
    name: Arc<str>,
    kind: ValueKind,
    offset: usize,
}

impl Param {
    /// The class that declared the property.
    pub fn owner(&self) -> TypeId {
        self.owner
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Byte offset from the instance pointer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn field(&self, obj: Instance) -> *mut u8 {
        obj.as_ptr().as_ptr().wrapping_add(self.offset)
    }

    /// # Safety
    /// `obj` must be an instance of the owning class or a subclass.
    unsafe fn read(&self, obj: Instance) -> Value {
        let field = self.field(obj);
        match self.kind {
            ValueKind::Null => Value::Null,
            ValueKind::Bool => Value::Bool(field.cast::<bool>().read()),
            ValueKind::Int => Value::Int(field.cast::<i32>().read()),
            ValueKind::Long => Value::Long(field.cast::<i64>().read()),
            ValueKind::Double => Value::Double(field.cast::<f64>().read()),
            ValueKind::Pointer => Value::Pointer(field.cast::<*mut u8>().read()),
            ValueKind::Object => Value::Object(field.cast::<Option<Instance>>().read()),
        }
    }

    /// # Safety
    /// Same as [`read`](Self::read); `value` must match the property kind.
    unsafe fn write(&self, obj: Instance, value: Value) {
        let field = self.field(obj);
        match (self.kind, value) {
            (ValueKind::Bool, Value::Bool(b)) => field.cast::<bool>().write(b),
            (ValueKind::Int, Value::Int(i)) => field.cast::<i32>().write(i),
            (ValueKind::Long, Value::Long(l)) => field.cast::<i64>().write(l),
            (ValueKind::Double, Value::Double(d)) => field.cast::<f64>().write(d),
            (ValueKind::Pointer, Value::Pointer(p)) => field.cast::<*mut u8>().write(p),
            (ValueKind::Pointer, Value::Null) => field.cast::<*mut u8>().write(std::ptr::null_mut()),
            (ValueKind::Object, Value::Object(obj)) => field.cast::<Option<Instance>>().write(obj),
            (ValueKind::Object, Value::Null) => field.cast::<Option<Instance>>().write(None),
            _ => {}
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        value.kind() == self.kind
            || (value.kind() == ValueKind::Null
                && matches!(self.kind, ValueKind::Pointer | ValueKind::Object))
    }
}

impl TypeRegistry {
    /// Declare a property on the class `ty`.
    ///
    /// The field must lie inside the instance struct after the instance
    /// header and be aligned for its kind. `Null` has no storage and is
    /// rejected. See [`add_property!`](crate::add_property) for computing
    /// the offset from a field name.
    pub fn add_property(
        &self,
        ty: TypeId,
        name: &str,
        kind: ValueKind,
        offset: usize,
    ) -> Result<Arc<Param>, PropertyError> {
        let node = self.node(ty).ok_or(PropertyError::NotAClass(ty))?;
        let data = node.class_data().ok_or(PropertyError::NotAClass(ty))?;

        let fits = kind != ValueKind::Null
            && offset >= mem::size_of::<InstanceHeader>()
            && offset
                .checked_add(kind.size())
                .is_some_and(|end| end <= data.instance_size)
            && offset % kind.align() == 0;
        if !fits {
            let err = PropertyError::InvalidOffset {
                type_name: node.name().to_string(),
                name: name.to_string(),
                offset,
            };
            tracing::warn!(target: "sysobj::object", "{err}");
            return Err(err);
        }

        let mut props = data.props.lock();
        if props.iter().any(|param| param.name() == name) {
            let err = PropertyError::Duplicate {
                type_name: node.name().to_string(),
                name: name.to_string(),
            };
            tracing::warn!(target: "sysobj::object", "{err}");
            return Err(err);
        }
        let param = Arc::new(Param {
            owner: ty,
            owner_name: Arc::clone(&node.name),
            name: Arc::from(name),
            kind,
            offset,
        });
        props.push(Arc::clone(&param));
        tracing::debug!(target: "sysobj::object", class = %node.name(), property = name, %kind, offset, "property added");
        Ok(param)
    }

    /// Properties declared by `ty` itself, in registration order.
    pub fn get_properties(&self, ty: TypeId) -> Vec<Arc<Param>> {
        self.node(ty)
            .and_then(|node| node.class_data().map(|data| data.props.lock().clone()))
            .unwrap_or_default()
    }

    /// Look `name` up on `ty`, then on its ancestors.
    pub fn find_property(&self, ty: TypeId, name: &str) -> Option<Arc<Param>> {
        let node = self.node(ty)?;
        node.supers().iter().find_map(|&ancestor| {
            let ancestor = self.node(ancestor)?;
            let props = ancestor.class_data()?.props.lock();
            let found = props.iter().find(|param| param.name() == name).cloned();
            found
        })
    }

    fn lookup_property(&self, obj: Instance, name: &str) -> Result<Arc<Param>, PropertyError> {
        self.find_property(obj.type_id(), name).ok_or_else(|| {
            let err = PropertyError::NotFound {
                type_name: self
                    .type_name(obj.type_id())
                    .as_deref()
                    .unwrap_or("<unknown>")
                    .to_string(),
                name: name.to_string(),
            };
            tracing::warn!(target: "sysobj::object", "{err}");
            err
        })
    }

    /// Read a property of `obj`.
    pub fn get_property(&self, obj: Instance, name: &str) -> Result<Value, PropertyError> {
        let param = self.lookup_property(obj, name)?;
        // SAFETY: the property was found on the object's own type chain.
        Ok(unsafe { param.read(obj) })
    }

    /// Write a property of `obj`.
    ///
    /// A value of the wrong kind is rejected and nothing is written. Object
    /// properties hold weak handles; no reference is taken.
    pub fn set_property(
        &self,
        obj: Instance,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), PropertyError> {
        let value = value.into();
        let param = self.lookup_property(obj, name)?;
        if !param.accepts(&value) {
            let err = PropertyError::TypeMismatch {
                name: name.to_string(),
                expected: param.kind(),
                actual: value.kind(),
            };
            tracing::warn!(target: "sysobj::object", "{err}");
            return Err(err);
        }
        // SAFETY: as in get_property, and the kind has been checked.
        unsafe { param.write(obj, value) };
        Ok(())
    }
}

/// Declare a property named after a field of a `#[repr(C)]` instance struct.
///
/// ```
/// use sysobj_core::{add_property, impl_vtable, Object, ObjectClass, TypeId, TypeInfo, TypeRegistry, ValueKind, Vtable};
///
/// #[derive(Default)]
/// struct LampClass {
///     parent: ObjectClass,
/// }
/// impl_vtable!(LampClass, parent);
///
/// #[repr(C)]
/// struct Lamp {
///     parent: Object,
///     watts: i32,
/// }
///
/// fn lamp_class_init(_class: &mut dyn Vtable) {}
///
/// let registry = TypeRegistry::new();
/// let lamp = registry
///     .register_type(TypeId::OBJECT, TypeInfo::class::<LampClass, Lamp>("Lamp").with_class_init(lamp_class_init))
///     .unwrap();
/// let param = add_property!(registry, lamp, Lamp, watts, ValueKind::Int).unwrap();
/// assert_eq!(param.name(), "watts");
///
/// let obj = registry.object_new(lamp).unwrap();
/// registry.set_property(obj, "watts", 60i32).unwrap();
/// assert_eq!(registry.get_property(obj, "watts").unwrap().as_int(), Some(60));
/// registry.object_unref(obj);
/// ```
#[macro_export]
macro_rules! add_property {
    ($registry:expr, $ty:expr, $instance:ty, $field:ident, $kind:expr) => {
        $registry.add_property(
            $ty,
            stringify!($field),
            $kind,
            ::std::mem::offset_of!($instance, $field),
        )
    };
}
