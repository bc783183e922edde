//! Dynamic object runtime
//!
//! A registry of fundamental types, single-inheritance classes and
//! interfaces, with lazily built class descriptors, instances carrying
//! inherited private data, an `Object` base class and named property
//! reflection. Memory comes from the block layer in `sysobj-gc`.
//!
//! # Instance layout
//!
//! ```text
//! block start
//! v
//! [ Circle private | Shape private | InstanceHeader | Shape fields | Circle fields ]
//!                                  ^
//!                                  Instance (offsets into private data are negative)
//! ```

#![warn(rust_2018_idioms)]

pub mod class;
pub mod config;
pub mod defaults;
pub mod error;
pub mod instance;
pub mod interface;
pub mod logging;
pub mod object;
pub mod param;
pub mod types;
pub mod value;

pub use class::ClassDescriptor;
pub use config::RuntimeOptions;
pub use error::{ConfigError, PropertyError, RegistryError, RegistryResult};
pub use instance::{Instance, InstanceHeader};
pub use interface::{InterfaceEntry, TypeInterface};
pub use object::{chain_dispose, chain_finalize, Object, ObjectClass};
pub use param::Param;
pub use types::{NodeKind, TeardownReport, TypeId, TypeInfo, TypeNode, TypeRegistry, Vtable};
pub use value::{Value, ValueKind};

pub use sysobj_gc::{Collector, Rooted, Strategy, TrackMode};
