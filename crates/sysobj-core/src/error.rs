//! Error types for the type registry, reflection and configuration.

use thiserror::Error;

use crate::types::TypeId;
use crate::value::ValueKind;

/// Registry errors
///
/// Everything except `UnknownType`, `NotAClass`, `AbstractInstantiation`
/// and `OutOfMemory` is a configuration error: a malformed declaration
/// that should stop the program where the type is first registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A type declaration is missing something it needs
    #[error("Invalid declaration of type {name}: {reason}")]
    InvalidDeclaration {
        /// Type name
        name: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Type names must be unique
    #[error("Duplicate type name: {name}")]
    DuplicateName {
        /// Type name
        name: String,
    },

    /// Classes must derive from classes, interfaces from interfaces
    #[error("Type {name} cannot derive from {parent}")]
    WrongParentKind {
        /// Type name
        name: String,
        /// Parent type name
        parent: String,
    },

    /// Fundamental tags must be below 256 and unused
    #[error("Fundamental tag {tag} is out of range or already taken")]
    InvalidFundamental {
        /// Fundamental tag
        tag: u32,
    },

    /// A type implements the same interface twice
    #[error("Type {name} already implements {interface}")]
    DuplicateInterface {
        /// Implementing type name
        name: String,
        /// Interface name
        interface: String,
    },

    /// A class-init hook asked for its own class while it was being built
    #[error("Class {name} referenced during its own construction")]
    ClassUnderConstruction {
        /// Type name
        name: String,
    },

    /// The type id is not registered
    #[error("Unknown type: {0}")]
    UnknownType(TypeId),

    /// The operation needs a class type
    #[error("Type {name} is not a class")]
    NotAClass {
        /// Type name
        name: String,
    },

    /// The operation needs an interface type
    #[error("Type {name} is not an interface")]
    NotAnInterface {
        /// Type name
        name: String,
    },

    /// The operation needs a type deriving from Object
    #[error("Type {name} does not derive from Object")]
    NotAnObject {
        /// Type name
        name: String,
    },

    /// Abstract classes cannot be instantiated
    #[error("Cannot instantiate abstract class {name}")]
    AbstractInstantiation {
        /// Type name
        name: String,
    },

    /// The block layer returned no memory
    #[error("Allocation of {size} bytes failed")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
    },

    /// The registry has been torn down
    #[error("Type registry has been torn down")]
    TornDown,
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Property reflection errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PropertyError {
    /// No property with that name on the type or its ancestors
    #[error("Type {type_name} has no property {name}")]
    NotFound {
        /// Type name
        type_name: String,
        /// Property name
        name: String,
    },

    /// The value does not match the property's declared kind
    #[error("Property {name} holds {expected}, got {actual}")]
    TypeMismatch {
        /// Property name
        name: String,
        /// Declared kind
        expected: ValueKind,
        /// Kind of the offered value
        actual: ValueKind,
    },

    /// The type already declares a property with that name
    #[error("Type {type_name} already has a property {name}")]
    Duplicate {
        /// Type name
        type_name: String,
        /// Property name
        name: String,
    },

    /// The field does not fit inside the instance
    #[error("Property {name} at offset {offset} does not fit in {type_name}")]
    InvalidOffset {
        /// Type name
        type_name: String,
        /// Property name
        name: String,
        /// Byte offset into the instance
        offset: usize,
    },

    /// Properties can only be declared on classes
    #[error("Cannot declare properties on {0}")]
    NotAClass(TypeId),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML text could not be parsed
    #[error("Invalid runtime configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override has an unusable value
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue {
        /// Environment variable name
        key: &'static str,
        /// Offending value
        value: String,
    },
}

/// Log a contract violation and trap if the registry asks for it.
macro_rules! contract_violation {
    ($trap:expr, $($arg:tt)+) => {{
        let message = format!($($arg)+);
        tracing::error!(target: "sysobj::object", "{}", message);
        if $trap {
            panic!("contract violation: {}", message);
        }
    }};
}

pub(crate) use contract_violation;
