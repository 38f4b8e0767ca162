//! Class flavors.
//!
//! Each flavor contributes a builder that turns its own field declarations
//! into a [`ClassDef`], and an [`Adapter`] that describes such a class in the
//! flavor-independent terms of [`ClassDescriptor`]. The adapter table is
//! probed in order; the first adapter that supports a class describes it.
pub mod dataclass;
pub mod model;
pub mod orm;

use crate::class::{ClassDef, Slot};
use crate::error::{Error, Result};
use crate::meta::{ClassDescriptor, FieldDescriptor};
use crate::types::{ClassRef, FieldType, Namespace};

pub use dataclass::{DataclassAdapter, DataclassBuilder};
pub use model::{ModelAdapter, ModelBuilder};
pub use orm::{Collection, Column, ColumnType, OrmAdapter, OrmBuilder, Relationship};

pub trait Adapter: Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, class: &ClassDef) -> bool;

    fn describe(&self, class: &ClassDef) -> Result<ClassDescriptor>;
}

static ADAPTERS: [&dyn Adapter; 3] = [&DataclassAdapter, &ModelAdapter, &OrmAdapter];

pub fn describe(class: &ClassDef) -> Result<ClassDescriptor> {
    let adapter = ADAPTERS
        .iter()
        .find(|adapter| adapter.supports(class))
        .ok_or_else(|| Error::NotAClass {
            class: class.name().to_string(),
            reason: "no adapter supports it".to_string(),
        })?;
    tracing::trace!(class = class.name(), adapter = adapter.name(), "describing class");
    adapter.describe(class)
}

// ————————————————————————————————————————————————————————————————————————————
// SHARED BUILDER PIECES
// ————————————————————————————————————————————————————————————————————————————

/// Resolves the handle a builder defines, registering it in `ns` first so the
/// class can refer to itself.
pub(crate) fn claim_handle(ns: &mut Namespace, name: &str, handle: Option<ClassRef>) -> ClassRef {
    let handle = handle.unwrap_or_else(|| ClassRef::new(name));
    ns.insert(handle.clone());
    handle
}

pub(crate) fn field_descriptor(slot: &Slot, param: &str) -> FieldDescriptor {
    FieldDescriptor {
        attribute_name: slot.name.clone(),
        ty: slot.ty.clone(),
        required: slot.required,
        initializer_param_name: param.to_string(),
        settable_via_constructor: slot.init,
    }
}

pub(crate) fn classify_field(annotation: &str, ns: &Namespace) -> Result<FieldType> {
    crate::types::classify_str(annotation, ns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Flavor;

    #[test]
    fn each_flavor_is_picked_up_by_its_adapter() {
        let mut ns = Namespace::new();
        let dc = DataclassBuilder::new("D").field("x", "int").build(&mut ns).unwrap();
        let m = ModelBuilder::new("M").field("x", "int").build(&mut ns).unwrap();
        let o = OrmBuilder::new("O")
            .column(Column::new("id", ColumnType::Integer).primary_key())
            .build(&mut ns)
            .unwrap();
        assert_eq!(describe(&dc).unwrap().flavor, Flavor::Dataclass);
        assert_eq!(describe(&m).unwrap().flavor, Flavor::Model);
        assert_eq!(describe(&o).unwrap().flavor, Flavor::Orm);
    }
}
