//! Relational-mapper entities: typed columns plus relationships.
//!
//! A column is optional to construct when the database can fill it in: it
//! has a client or server default, is an auto-incrementing primary key, or is
//! a foreign key. Relationships are never required.
use std::sync::Arc;

use super::{Adapter, claim_handle, field_descriptor};
use crate::class::{ClassBody, ClassDef, DefaultValue, Slot};
use crate::error::{Error, Result};
use crate::meta::{AssignmentHook, ClassDescriptor, ConstructionStrategy, Flavor};
use crate::types::{Builtin, ClassRef, FieldType, Namespace};
use crate::value::Value;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    BigInteger,
    SmallInteger,
    Boolean,
    Float,
    Numeric,
    String,
    Text,
    Date,
    DateTime,
    LargeBinary,
    Uuid,
    /// Column backed by a named enum class
    Enum(String),
    Array(Box<ColumnType>),
    /// Untyped JSON; has no representable element type
    Json,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub server_default: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub foreign_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Single,
    List,
    Set,
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub collection: Collection,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct OrmBuilder {
    name: String,
    handle: Option<ClassRef>,
    columns: Vec<Column>,
    relationships: Vec<Relationship>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl ColumnType {
    fn is_integer(&self) -> bool {
        matches!(self, Self::Integer | Self::BigInteger | Self::SmallInteger)
    }

    pub(crate) fn field_type(&self, ns: &Namespace) -> Result<FieldType> {
        let builtin = match self {
            Self::Integer | Self::BigInteger | Self::SmallInteger => Builtin::Int,
            Self::Boolean => Builtin::Bool,
            Self::Float | Self::Numeric => Builtin::Float,
            Self::String | Self::Text => Builtin::Str,
            Self::Date => Builtin::Date,
            Self::DateTime => Builtin::DateTime,
            Self::LargeBinary => Builtin::Bytes,
            Self::Uuid => Builtin::Uuid,
            Self::Enum(name) => {
                return ns.resolve(name).map(FieldType::class).ok_or_else(|| {
                    Error::UnsupportedType {
                        annotation: format!("Enum({name})"),
                        reason: format!("unknown enum class '{name}'"),
                    }
                });
            }
            Self::Array(item) => return Ok(FieldType::list(item.field_type(ns)?)),
            Self::Json => {
                return Err(Error::UnsupportedType {
                    annotation: "JSON".to_string(),
                    reason: "JSON columns have no element type".to_string(),
                });
            }
        };
        Ok(builtin.ty())
    }
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: false,
            default: None,
            server_default: false,
            primary_key: false,
            autoincrement: false,
            foreign_key: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn server_default(mut self) -> Self {
        self.server_default = true;
        self
    }

    /// Integer primary keys auto-increment unless turned off again with
    /// [`Column::autoincrement`].
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.autoincrement = self.column_type.is_integer();
        self
    }

    pub fn autoincrement(mut self, enabled: bool) -> Self {
        self.autoincrement = enabled;
        self
    }

    pub fn foreign_key(mut self, reference: &str) -> Self {
        self.foreign_key = Some(reference.to_string());
        self
    }

    pub fn is_required(&self) -> bool {
        let generated = self.primary_key && self.autoincrement;
        !(self.default.is_some() || self.server_default || generated || self.foreign_key.is_some())
    }

    fn slot(&self, ns: &Namespace) -> Result<Slot> {
        let mut ty = self.column_type.field_type(ns)?;
        if self.nullable {
            ty = FieldType::optional(ty);
        }
        let required = self.is_required();
        // columns the database fills in start out empty
        let default = match &self.default {
            Some(value) => Some(DefaultValue::Value(value.clone())),
            None if !required || self.nullable => Some(DefaultValue::Value(Value::None)),
            None => None,
        };
        Ok(Slot {
            name: self.name.clone(),
            ty,
            default,
            alias: None,
            init: true,
            required,
        })
    }
}

impl Relationship {
    pub fn new(name: &str, target: &str, collection: Collection) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            collection,
            nullable: collection == Collection::Single,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    fn slot(&self, ns: &Namespace) -> Result<Slot> {
        let target = ns.resolve(&self.target).map(FieldType::class).ok_or_else(|| {
            Error::UnsupportedType {
                annotation: self.target.clone(),
                reason: format!("unknown relationship target '{}'", self.target),
            }
        })?;
        let (ty, default) = match self.collection {
            Collection::Single => (target, DefaultValue::Value(Value::None)),
            Collection::List => (
                FieldType::list(target),
                DefaultValue::Factory(Arc::new(|| Value::list([]))),
            ),
            Collection::Set => (
                FieldType::set(target),
                DefaultValue::Factory(Arc::new(|| Value::set([]))),
            ),
        };
        let ty = if self.nullable { FieldType::optional(ty) } else { ty };
        Ok(Slot {
            name: self.name.clone(),
            ty,
            default: Some(default),
            alias: None,
            init: true,
            required: false,
        })
    }
}

impl OrmBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            handle: None,
            columns: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_handle(handle: ClassRef) -> Self {
        Self { name: handle.name().to_string(), handle: Some(handle), ..Self::new("") }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn build(self, ns: &mut Namespace) -> Result<Arc<ClassDef>> {
        let handle = claim_handle(ns, &self.name, self.handle);
        let mut slots = Vec::with_capacity(self.columns.len() + self.relationships.len());
        for column in &self.columns {
            slots.push(column.slot(ns)?);
        }
        for relationship in &self.relationships {
            slots.push(relationship.slot(ns)?);
        }
        Ok(ClassDef::new(handle, slots, ClassBody::Orm))
    }
}

pub struct OrmAdapter;

impl Adapter for OrmAdapter {
    fn name(&self) -> &'static str {
        "orm"
    }

    fn supports(&self, class: &ClassDef) -> bool {
        matches!(class.body(), ClassBody::Orm)
    }

    fn describe(&self, class: &ClassDef) -> Result<ClassDescriptor> {
        let fields = class
            .slots()
            .iter()
            .map(|slot| (slot.name.clone(), field_descriptor(slot, &slot.name)))
            .collect();
        Ok(ClassDescriptor {
            class: class.class().clone(),
            qualified_name: class.name().to_string(),
            flavor: Flavor::Orm,
            fields,
            construction: ConstructionStrategy::Validating,
            hook: AssignmentHook::None,
        })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_columns() {
        let mut ns = Namespace::new();
        ns.declare("Parent");
        let def = OrmBuilder::new("Child")
            .column(Column::new("id", ColumnType::Integer).primary_key())
            .column(Column::new("code", ColumnType::String).primary_key())
            .column(Column::new("name", ColumnType::String))
            .column(Column::new("note", ColumnType::Text).nullable())
            .column(Column::new("created", ColumnType::DateTime).server_default())
            .column(Column::new("level", ColumnType::Integer).default(1))
            .column(Column::new("parent_id", ColumnType::Integer).foreign_key("parent.id"))
            .relationship(Relationship::new("parent", "Parent", Collection::Single))
            .build(&mut ns)
            .unwrap();
        let desc = OrmAdapter.describe(&def).unwrap();
        let required: Vec<&str> = desc
            .fields
            .values()
            .filter(|f| f.required)
            .map(|f| f.attribute_name.as_str())
            .collect();
        // a nullable column without default still has to be passed explicitly
        assert_eq!(required, ["code", "name", "note"]);
    }

    #[test]
    fn column_and_relationship_types() {
        let mut ns = Namespace::new();
        let item = ns.declare("Item");
        let def = OrmBuilder::new("Order")
            .column(Column::new("tags", ColumnType::Array(Box::new(ColumnType::String))))
            .relationship(Relationship::new("items", "Item", Collection::List))
            .relationship(Relationship::new("owner", "Item", Collection::Single))
            .build(&mut ns)
            .unwrap();
        assert_eq!(def.slots()[0].ty, FieldType::list(Builtin::Str.ty()));
        assert_eq!(def.slots()[1].ty, FieldType::list(FieldType::class(&item)));
        assert_eq!(def.slots()[2].ty, FieldType::optional(FieldType::class(&item)));
        let value = def.construct([("tags", Value::list([]))]).unwrap();
        assert_eq!(value.attr("items").unwrap(), &Value::list([]));
        assert_eq!(value.attr("owner").unwrap(), &Value::None);
    }

    #[test]
    fn json_column_is_unsupported() {
        let mut ns = Namespace::new();
        let err = OrmBuilder::new("Doc")
            .column(Column::new("payload", ColumnType::Json))
            .build(&mut ns)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { .. }));
    }
}
