//! Object-to-object mapping generator.
//!
//! A mapping between two classes is synthesized once, when it is registered:
//! every target field is resolved to a source field, an override or its
//! default, and a conversion expression is derived from the two field types.
//! The result is a small method in a code IR that can be rendered as text for
//! inspection and is executed against runtime [`Value`]s when invoked.
//!
//! ```text
//! ClassDef ──adapters──▶ ClassDescriptor ──plan──▶ Plan ──convert/update──▶ MappingMethod
//!                                                                               │
//!                                           Registry ◀──────── register ────────┘
//! ```
pub mod adapters;
pub mod class;
pub mod cli;
pub mod convert;
pub mod enums;
pub mod error;
pub(crate) mod interp;
pub mod ir;
pub mod meta;
pub mod method;
pub mod path_de;
pub mod plan;
pub mod registry;
pub mod schema;
pub mod types;
pub mod update;
pub mod value;

use std::sync::Arc;

pub use adapters::{Collection, Column, ColumnType, DataclassBuilder, ModelBuilder, OrmBuilder, Relationship};
pub use class::{ClassDef, DefaultValue};
pub use enums::{EnumDef, EnumOverrides};
pub use error::{Error, Result};
pub use meta::{Direction, MapperMode};
pub use plan::{
    FieldOverride, Overrides, assume_not_none, from_extra, ignore, init_with_default, update_only_if_set,
};
pub use registry::{Extra, MapTarget, Registry};
pub use types::{ClassRef, FieldType, Namespace};
pub use value::{Instance, Value};

/// Registers a mapping in the process-wide registry.
pub fn register_mapping(
    source: &Arc<ClassDef>,
    target: &Arc<ClassDef>,
    overrides: &Overrides,
    mode: MapperMode,
) -> Result<()> {
    Registry::global().register(source, target, overrides, mode)
}

/// Maps `source` through the process-wide registry: constructs a new object
/// when given a class, updates in place when given an object.
pub fn map_to(source: &Value, target: MapTarget<'_>, extra: &Extra) -> Result<Option<Value>> {
    Registry::global().invoke(source, target, extra)
}
