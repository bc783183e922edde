//! Tagged values for property access.

use std::fmt;
use std::mem;

use crate::instance::Instance;
use crate::types::TypeId;

/// Kind of value a property holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Long,
    Double,
    Pointer,
    /// Weak object handle, stored as `Option<Instance>`
    Object,
}

impl ValueKind {
    /// Bytes the field occupies in the instance struct.
    pub fn size(self) -> usize {
        match self {
            ValueKind::Null => 0,
            ValueKind::Bool => mem::size_of::<bool>(),
            ValueKind::Int => mem::size_of::<i32>(),
            ValueKind::Long => mem::size_of::<i64>(),
            ValueKind::Double => mem::size_of::<f64>(),
            ValueKind::Pointer => mem::size_of::<*mut u8>(),
            ValueKind::Object => mem::size_of::<Option<Instance>>(),
        }
    }

    pub fn align(self) -> usize {
        match self {
            ValueKind::Null => 1,
            ValueKind::Bool => mem::align_of::<bool>(),
            ValueKind::Int => mem::align_of::<i32>(),
            ValueKind::Long => mem::align_of::<i64>(),
            ValueKind::Double => mem::align_of::<f64>(),
            ValueKind::Pointer => mem::align_of::<*mut u8>(),
            ValueKind::Object => mem::align_of::<Option<Instance>>(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Long => "long",
            ValueKind::Double => "double",
            ValueKind::Pointer => "pointer",
            ValueKind::Object => "object",
        }
    }

    /// The fundamental type describing this kind.
    pub fn fundamental(self) -> Option<TypeId> {
        match self {
            ValueKind::Null => None,
            ValueKind::Bool => Some(TypeId::BOOL),
            ValueKind::Int => Some(TypeId::INT),
            ValueKind::Long => Some(TypeId::LONG),
            ValueKind::Double => Some(TypeId::DOUBLE),
            ValueKind::Pointer => Some(TypeId::POINTER),
            ValueKind::Object => Some(TypeId::OBJECT),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A property value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Pointer(*mut u8),
    Object(Option<Instance>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Long(_) => ValueKind::Long,
            Value::Double(_) => ValueKind::Double,
            Value::Pointer(_) => ValueKind::Pointer,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Object(None))
            || matches!(self, Value::Pointer(p) if p.is_null())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Long value, widening ints.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i64::from(*i)),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<*mut u8> {
        match self {
            Value::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<Instance> {
        match self {
            Value::Object(obj) => *obj,
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<Instance> for Value {
    fn from(obj: Instance) -> Self {
        Value::Object(Some(obj))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Long(l) => write!(f, "{l}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Pointer(p) => write!(f, "{p:p}"),
            Value::Object(Some(obj)) => write!(f, "<object {:p}>", obj.as_ptr()),
            Value::Object(None) => write!(f, "<object null>"),
        }
    }
}
