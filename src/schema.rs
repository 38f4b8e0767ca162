//! JSON schema documents: enums, classes of every flavor, and the mappings
//! between them.
//!
//! A document is loaded into a [`Catalog`] in three steps. Every name is
//! declared up front so annotations may refer to classes defined later in
//! the document, then the classes are built, and finally the mappings are
//! registered. Mappings are retried until no more of them can be registered,
//! so a mapping may be listed before the nested mappings it depends on.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

use crate::adapters::{Collection, Column, ColumnType, DataclassBuilder, ModelBuilder, OrmBuilder, Relationship};
use crate::class::{ClassDef, DefaultValue};
use crate::enums::{EnumDef, EnumOverrides};
use crate::error::{Error, Result};
use crate::ir::Module;
use crate::meta::{Direction, MapperMode};
use crate::path_de;
use crate::plan::{self, FieldOverride, Overrides};
use crate::registry::{MappingKey, Registered, Registry};
use crate::types::{ClassId, ClassRef, FieldType, Namespace, classify_str};
use crate::value::Value;
use crate::value::json::{self, ClassLookup};

// ————————————————————————————————————————————————————————————————————————————
// DOCUMENT
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDoc {
    #[serde(default)]
    pub enums: Vec<EnumDoc>,
    #[serde(default)]
    pub classes: Vec<ClassDoc>,
    #[serde(default)]
    pub mappings: Vec<MappingDoc>,
    #[serde(default)]
    pub enum_mappings: Vec<EnumMappingDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumDoc {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ClassDoc {
    Dataclass {
        name: String,
        fields: Vec<FieldDoc>,
    },
    Model {
        name: String,
        fields: Vec<FieldDoc>,
        #[serde(default)]
        populate_by_name: bool,
    },
    Orm {
        name: String,
        #[serde(default)]
        columns: Vec<ColumnDoc>,
        #[serde(default)]
        relationships: Vec<RelationshipDoc>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub annotation: String,
    /// Decoded against the field's own type; `null` is a default too
    #[serde(default, deserialize_with = "present")]
    pub default: Option<serde_json::Value>,
    pub default_factory: Option<DefaultFactory>,
    pub alias: Option<String>,
    /// Dataclass fields only
    #[serde(default = "yes")]
    pub init: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultFactory {
    List,
    Set,
    Dict,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnTypeDoc,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, deserialize_with = "present")]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub server_default: bool,
    #[serde(default)]
    pub primary_key: bool,
    pub autoincrement: Option<bool>,
    pub foreign_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnTypeDoc {
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
    Json,
    Enum(String),
    Array(Box<ColumnTypeDoc>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationshipDoc {
    pub name: String,
    pub target: String,
    #[serde(default = "single")]
    pub collection: CollectionDoc,
    pub nullable: Option<bool>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionDoc {
    Single,
    List,
    Set,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingDoc {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub mode: MapperMode,
    #[serde(default)]
    pub overrides: IndexMap<String, OverrideDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumMappingDoc {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub overrides: EnumOverrides,
}

/// One override. A bare string names the source field, unless it is one of
/// the keywords `"ignore"` / `"init_with_default"` or a legacy spelling.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OverrideDoc {
    Kind(OverrideKind),
    Source(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum OverrideKind {
    Ignore,
    InitWithDefault,
    #[serde(rename = "USE_DEFAULT")]
    LegacyUseDefault,
    #[serde(rename = "IGNORE_MISSING_MAPPING")]
    LegacyIgnoreMissingMapping,
    Source(String),
    FromExtra(String),
    /// A nullary factory returning this value
    Constant(serde_json::Value),
    AssumeNotNone(Option<String>),
    UpdateOnlyIfSet(Option<String>),
}

fn present<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<serde_json::Value>, D::Error> {
    serde_json::Value::deserialize(de).map(Some)
}

fn yes() -> bool {
    true
}

fn single() -> CollectionDoc {
    CollectionDoc::Single
}

impl SchemaDoc {
    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read(path).map_err(|error| {
            Error::schema(format!("failed to read '{}': {error}", path.display()))
        })?;
        path_de::from_slice_with_path(&source)
    }

    /// Appends the declarations of `other`.
    pub fn merge(&mut self, other: SchemaDoc) {
        self.enums.extend(other.enums);
        self.classes.extend(other.classes);
        self.mappings.extend(other.mappings);
        self.enum_mappings.extend(other.enum_mappings);
    }
}

impl ClassDoc {
    pub fn name(&self) -> &str {
        match self {
            Self::Dataclass { name, .. } | Self::Model { name, .. } | Self::Orm { name, .. } => name,
        }
    }
}

impl From<&ColumnTypeDoc> for ColumnType {
    fn from(doc: &ColumnTypeDoc) -> Self {
        match doc {
            ColumnTypeDoc::Integer => Self::Integer,
            ColumnTypeDoc::BigInteger => Self::BigInteger,
            ColumnTypeDoc::SmallInteger => Self::SmallInteger,
            ColumnTypeDoc::Boolean => Self::Boolean,
            ColumnTypeDoc::Float => Self::Float,
            ColumnTypeDoc::Numeric => Self::Numeric,
            ColumnTypeDoc::String => Self::String,
            ColumnTypeDoc::Text => Self::Text,
            ColumnTypeDoc::Date => Self::Date,
            ColumnTypeDoc::DateTime => Self::DateTime,
            ColumnTypeDoc::LargeBinary => Self::LargeBinary,
            ColumnTypeDoc::Uuid => Self::Uuid,
            ColumnTypeDoc::Json => Self::Json,
            ColumnTypeDoc::Enum(name) => Self::Enum(name.clone()),
            ColumnTypeDoc::Array(item) => Self::Array(Box::new(item.as_ref().into())),
        }
    }
}

impl From<CollectionDoc> for Collection {
    fn from(doc: CollectionDoc) -> Self {
        match doc {
            CollectionDoc::Single => Self::Single,
            CollectionDoc::List => Self::List,
            CollectionDoc::Set => Self::Set,
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CATALOG
// ————————————————————————————————————————————————————————————————————————————

/// The classes and enums of a loaded document.
#[derive(Debug, Default)]
pub struct Catalog {
    namespace: Namespace,
    classes: IndexMap<String, Arc<ClassDef>>,
    enums: IndexMap<String, Arc<EnumDef>>,
    by_id: HashMap<ClassId, String>,
    mappings: Vec<(String, String)>,
}

impl Catalog {
    /// Builds every class of `doc` and registers its mappings into
    /// `registry`.
    pub fn load(doc: &SchemaDoc, registry: &Registry) -> Result<Self> {
        let mut catalog = Self::default();
        for decl in &doc.enums {
            catalog.declare(&decl.name)?;
            let def = EnumDef::new(&mut catalog.namespace, &decl.name, decl.members.iter().cloned());
            catalog.by_id.insert(def.class().id(), def.name().to_string());
            catalog.enums.insert(decl.name.clone(), def);
        }
        let mut handles = Vec::with_capacity(doc.classes.len());
        for decl in &doc.classes {
            catalog.declare(decl.name())?;
            let handle = catalog.namespace.declare(decl.name());
            catalog.by_id.insert(handle.id(), decl.name().to_string());
            handles.push(handle);
        }
        for (decl, handle) in doc.classes.iter().zip(handles) {
            let def = catalog.build_class(decl, handle)?;
            catalog.classes.insert(decl.name().to_string(), def);
        }
        for decl in &doc.enum_mappings {
            let source = catalog.enum_named(&decl.source)?;
            let target = catalog.enum_named(&decl.target)?;
            registry.register_enum(source, target, &decl.overrides)?;
        }
        catalog.register_mappings(&doc.mappings, registry)?;
        tracing::debug!(
            classes = catalog.classes.len(),
            enums = catalog.enums.len(),
            mappings = catalog.mappings.len(),
            "loaded schema"
        );
        Ok(catalog)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn class(&self, name: &str) -> Result<&Arc<ClassDef>> {
        self.classes
            .get(name)
            .ok_or_else(|| Error::schema(format!("unknown class '{name}'")))
    }

    pub fn enum_named(&self, name: &str) -> Result<&Arc<EnumDef>> {
        self.enums
            .get(name)
            .ok_or_else(|| Error::schema(format!("unknown enum '{name}'")))
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<ClassDef>> {
        self.classes.values()
    }

    /// `(source, target)` class names of every registered class mapping, in
    /// registration order.
    pub fn mappings(&self) -> &[(String, String)] {
        &self.mappings
    }

    /// Resolves an annotation against the document's names.
    pub fn field_type(&self, annotation: &str) -> Result<FieldType> {
        classify_str(annotation, &self.namespace)
    }

    /// Decodes a JSON object into an instance of the named class.
    pub fn decode(&self, class: &str, json: &serde_json::Value) -> Result<Value> {
        json::decode_instance(json, self.class(class)?, self)
    }

    /// Renders the registered methods between two classes, create first.
    pub fn render(&self, registry: &Registry, source: &str, target: &str) -> Result<String> {
        let (source, target) = (self.class(source)?.class(), self.class(target)?.class());
        let functions = [Direction::Create, Direction::Update]
            .into_iter()
            .filter_map(|direction| match registry.lookup(&MappingKey::new(source, target, direction)) {
                Some(Registered::Method(method)) => Some(method.function().clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        if functions.is_empty() {
            return Err(Error::NoMappingRegistered {
                source_type: source.name().to_string(),
                target_type: target.name().to_string(),
            });
        }
        Ok(Module { functions }.render())
    }

    fn declare(&self, name: &str) -> Result<()> {
        if self.by_id.values().any(|known| known == name) {
            return Err(Error::schema(format!("'{name}' is declared more than once")));
        }
        Ok(())
    }

    fn build_class(&mut self, decl: &ClassDoc, handle: ClassRef) -> Result<Arc<ClassDef>> {
        match decl {
            ClassDoc::Dataclass { fields, .. } => {
                let mut builder = DataclassBuilder::with_handle(handle);
                for field in fields {
                    if field.alias.is_some() {
                        return Err(Error::schema(format!(
                            "dataclass field '{}' cannot have an alias",
                            field.name
                        )));
                    }
                    let default = self.field_default(field)?;
                    builder = builder.field_decl(&field.name, &field.annotation, default, field.init);
                }
                builder.build(&mut self.namespace)
            }
            ClassDoc::Model { fields, populate_by_name, .. } => {
                let mut builder = ModelBuilder::with_handle(handle).populate_by_name(*populate_by_name);
                for field in fields {
                    if !field.init {
                        return Err(Error::schema(format!(
                            "model field '{}' is always accepted by the constructor",
                            field.name
                        )));
                    }
                    let default = self.field_default(field)?;
                    builder = builder.field_decl(&field.name, &field.annotation, default, field.alias.clone());
                }
                builder.build(&mut self.namespace)
            }
            ClassDoc::Orm { columns, relationships, .. } => {
                let mut builder = OrmBuilder::with_handle(handle);
                for doc in columns {
                    builder = builder.column(self.column(doc)?);
                }
                for doc in relationships {
                    let mut relationship = Relationship::new(&doc.name, &doc.target, doc.collection.into());
                    if let Some(nullable) = doc.nullable {
                        relationship = relationship.nullable(nullable);
                    }
                    builder = builder.relationship(relationship);
                }
                builder.build(&mut self.namespace)
            }
        }
    }

    fn field_default(&self, field: &FieldDoc) -> Result<Option<DefaultValue>> {
        match (&field.default, field.default_factory) {
            (Some(_), Some(_)) => Err(Error::schema(format!(
                "field '{}' has both a default and a default factory",
                field.name
            ))),
            (Some(json), None) => {
                let ty = self.field_type(&field.annotation)?;
                Ok(Some(DefaultValue::Value(json::decode(json, &ty, self)?)))
            }
            (None, Some(factory)) => Ok(Some(DefaultValue::Factory(Arc::new(move || match factory {
                DefaultFactory::List => Value::list([]),
                DefaultFactory::Set => Value::set([]),
                DefaultFactory::Dict => Value::Dict(IndexMap::new()),
            })))),
            (None, None) => Ok(None),
        }
    }

    fn column(&self, doc: &ColumnDoc) -> Result<Column> {
        let column_type = ColumnType::from(&doc.column_type);
        let mut column = Column::new(&doc.name, column_type.clone());
        if doc.nullable {
            column = column.nullable();
        }
        if let Some(json) = &doc.default {
            let ty = column_type.field_type(&self.namespace)?;
            column = column.default(json::decode(json, &ty, self)?);
        }
        if doc.server_default {
            column = column.server_default();
        }
        if doc.primary_key {
            column = column.primary_key();
        }
        if let Some(enabled) = doc.autoincrement {
            column = column.autoincrement(enabled);
        }
        if let Some(reference) = &doc.foreign_key {
            column = column.foreign_key(reference);
        }
        Ok(column)
    }

    fn register_mappings(&mut self, docs: &[MappingDoc], registry: &Registry) -> Result<()> {
        let mut pending = docs.iter().collect::<Vec<_>>();
        while !pending.is_empty() {
            let mut deferred = Vec::new();
            let mut last_error = None;
            for doc in pending.iter().copied() {
                match self.register_mapping(doc, registry) {
                    Ok(()) => self.mappings.push((doc.source.clone(), doc.target.clone())),
                    // may depend on a nested mapping that is not registered yet
                    Err(error @ Error::FieldType { .. }) => {
                        deferred.push(doc);
                        last_error = Some(error);
                    }
                    Err(error) => return Err(error),
                }
            }
            if deferred.len() == pending.len() {
                if let Some(error) = last_error {
                    return Err(error);
                }
            }
            pending = deferred;
        }
        Ok(())
    }

    fn register_mapping(&self, doc: &MappingDoc, registry: &Registry) -> Result<()> {
        let source = self.class(&doc.source)?;
        let target = self.class(&doc.target)?;
        let mut overrides = Overrides::new();
        for (field, decl) in &doc.overrides {
            overrides.insert(field, self.field_override(target, field, decl)?);
        }
        registry.register(source, target, &overrides, doc.mode)
    }

    fn field_override(&self, target: &ClassDef, field: &str, decl: &OverrideDoc) -> Result<FieldOverride> {
        let kind = match decl {
            OverrideDoc::Source(name) => return Ok(FieldOverride::source(name)),
            OverrideDoc::Kind(kind) => kind,
        };
        Ok(match kind {
            OverrideKind::Ignore => plan::ignore(),
            OverrideKind::InitWithDefault => plan::init_with_default(),
            OverrideKind::LegacyUseDefault | OverrideKind::LegacyIgnoreMissingMapping => {
                tracing::warn!(
                    target_class = target.name(),
                    field,
                    "deprecated override spelling, use \"ignore\" instead"
                );
                plan::ignore()
            }
            OverrideKind::Source(name) => FieldOverride::source(name),
            OverrideKind::FromExtra(key) => plan::from_extra(key),
            OverrideKind::Constant(json) => {
                // unknown fields are reported by the plan builder
                let ty = target.slot(field).map_or(FieldType::Any, |slot| slot.ty.clone());
                FieldOverride::constant(json::decode(json, &ty, self)?)
            }
            OverrideKind::AssumeNotNone(name) => plan::assume_not_none(name.as_deref()),
            OverrideKind::UpdateOnlyIfSet(name) => plan::update_only_if_set(name.as_deref()),
        })
    }
}

impl ClassLookup for Catalog {
    fn class_def(&self, id: ClassId) -> Option<&Arc<ClassDef>> {
        self.by_id.get(&id).and_then(|name| self.classes.get(name))
    }

    fn enum_def(&self, id: ClassId) -> Option<&Arc<EnumDef>> {
        self.by_id.get(&id).and_then(|name| self.enums.get(name))
    }
}

/// Loads and merges every schema document in `paths`.
pub fn load_paths<P: AsRef<Path>>(paths: &[P]) -> Result<SchemaDoc> {
    let mut doc = SchemaDoc::default();
    for path in paths {
        doc.merge(SchemaDoc::from_path(path.as_ref())?);
    }
    Ok(doc)
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
