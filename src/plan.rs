//! Mapping plans: how every target field gets its value.
//!
//! Resolution per target field, in order: an explicit override, a source
//! field of the same name, and finally the field's own default (construction
//! only). Ignoring a required field is legal when updating, since the target
//! object already has a value for it.
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::meta::{ClassDescriptor, Direction, FieldDescriptor};
use crate::types::FieldType;
use crate::value::Value;

// ————————————————————————————————————————————————————————————————————————————
// OVERRIDES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone)]
pub enum Factory {
    Nullary(Arc<dyn Fn() -> Value + Send + Sync>),
    /// Receives the source object
    Unary(Arc<dyn Fn(&Value) -> Value + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreSpelling {
    Ignore,
    InitWithDefault,
}

#[derive(Debug, Clone)]
pub enum FieldOverride {
    /// Take the value from the named source field
    Source(String),
    Factory(Factory),
    /// Take the value from the caller-supplied `extra` dictionary
    FromExtra(String),
    Ignore(IgnoreSpelling),
    /// Treat the (possibly renamed) source field as never absent
    AssumeNotNone(Option<String>),
    /// Only assign when the (possibly renamed) source field is not absent
    UpdateOnlyIfSet(Option<String>),
}

/// Per-target-field overrides, keyed by target attribute name.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    entries: IndexMap<String, FieldOverride>,
}

pub fn ignore() -> FieldOverride {
    FieldOverride::Ignore(IgnoreSpelling::Ignore)
}

pub fn init_with_default() -> FieldOverride {
    FieldOverride::Ignore(IgnoreSpelling::InitWithDefault)
}

pub fn from_extra(key: &str) -> FieldOverride {
    FieldOverride::FromExtra(key.to_string())
}

pub fn assume_not_none(source: Option<&str>) -> FieldOverride {
    FieldOverride::AssumeNotNone(source.map(str::to_string))
}

pub fn update_only_if_set(source: Option<&str>) -> FieldOverride {
    FieldOverride::UpdateOnlyIfSet(source.map(str::to_string))
}

impl FieldOverride {
    pub fn source(name: &str) -> Self {
        Self::Source(name.to_string())
    }

    pub fn factory(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self::Factory(Factory::Nullary(Arc::new(f)))
    }

    pub fn factory_with_source(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self::Factory(Factory::Unary(Arc::new(f)))
    }

    pub fn constant(value: Value) -> Self {
        Self::factory(move || value.clone())
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nullary(_) => f.write_str("Factory(<fn()>)"),
            Self::Unary(_) => f.write_str("Factory(<fn(self)>)"),
        }
    }
}

impl fmt::Display for IgnoreSpelling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ignore => "ignore()",
            Self::InitWithDefault => "init_with_default()",
        })
    }
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, ovr: FieldOverride) -> Self {
        self.insert(field, ovr);
        self
    }

    pub fn insert(&mut self, field: &str, ovr: FieldOverride) {
        self.entries.insert(field.to_string(), ovr);
    }

    pub fn get(&self, field: &str) -> Option<&FieldOverride> {
        self.entries.get(field)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldOverride)> for Overrides {
    fn from_iter<I: IntoIterator<Item = (K, FieldOverride)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// PLAN
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone)]
pub enum Resolution {
    /// Convert from a source field. `ty` is the type to convert from, which
    /// may have had `Optional` stripped off `field.ty`.
    Field { field: FieldDescriptor, ty: FieldType, only_if_set: bool },
    Factory(Factory),
    FromExtra(String),
    /// Leave the field alone: its default when constructing, its current
    /// value when updating.
    Default,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub source: ClassDescriptor,
    pub target: ClassDescriptor,
    pub direction: Direction,
    pub entries: IndexMap<String, Resolution>,
}

pub fn build_plan(
    source: &ClassDescriptor,
    target: &ClassDescriptor,
    overrides: &Overrides,
    direction: Direction,
) -> Result<Plan> {
    let unknown: Vec<String> = overrides
        .keys()
        .filter(|key| !target.fields.contains_key(*key))
        .map(str::to_string)
        .collect();
    if !unknown.is_empty() {
        return Err(Error::UnknownOverrideKey {
            source_class: source.name().to_string(),
            target_class: target.name().to_string(),
            keys: unknown,
        });
    }

    let resolver = Resolver { source, target, direction };
    let mut entries = IndexMap::new();
    let mut missing = Vec::new();
    for (name, target_field) in &target.fields {
        let resolution = match overrides.get(name) {
            Some(ovr) => Some(resolver.explicit(target_field, ovr)?),
            None => resolver.implicit(target_field),
        };
        match resolution {
            Some(resolution) => {
                entries.insert(name.clone(), resolution);
            }
            None => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(Error::IncompleteMapping {
            source_class: source.name().to_string(),
            target_class: target.name().to_string(),
            fields: missing,
        });
    }
    tracing::debug!(
        source = source.name(),
        target = target.name(),
        %direction,
        fields = entries.len(),
        "built mapping plan"
    );
    Ok(Plan {
        source: source.clone(),
        target: target.clone(),
        direction,
        entries,
    })
}

struct Resolver<'a> {
    source: &'a ClassDescriptor,
    target: &'a ClassDescriptor,
    direction: Direction,
}

impl Resolver<'_> {
    fn explicit(&self, target_field: &FieldDescriptor, ovr: &FieldOverride) -> Result<Resolution> {
        let name = &target_field.attribute_name;
        Ok(match ovr {
            FieldOverride::Source(field) => {
                self.from_field(self.source_field(field)?, !target_field.required)
            }
            FieldOverride::Factory(factory) => Resolution::Factory(factory.clone()),
            FieldOverride::FromExtra(key) => Resolution::FromExtra(key.clone()),
            FieldOverride::Ignore(spelling) => {
                if self.direction == Direction::Create && target_field.required {
                    return Err(Error::InvalidOverride {
                        message: format!(
                            "'{name}' of '{}' cannot be set to {spelling}, as it has no default",
                            self.target.name()
                        ),
                    });
                }
                Resolution::Default
            }
            FieldOverride::AssumeNotNone(field) => {
                let field = self.source_field(field.as_deref().unwrap_or(name))?;
                Resolution::Field {
                    ty: field.ty.strip_optional().clone(),
                    field: field.clone(),
                    only_if_set: false,
                }
            }
            FieldOverride::UpdateOnlyIfSet(field) => {
                let field = self.source_field(field.as_deref().unwrap_or(name))?;
                Resolution::Field {
                    ty: field.ty.strip_optional().clone(),
                    field: field.clone(),
                    only_if_set: true,
                }
            }
        })
    }

    fn implicit(&self, target_field: &FieldDescriptor) -> Option<Resolution> {
        match self.source.fields.get(&target_field.attribute_name) {
            Some(field) => Some(self.from_field(field, !target_field.required)),
            None if self.direction == Direction::Create && !target_field.required => {
                Some(Resolution::Default)
            }
            None => None,
        }
    }

    /// When updating, an absent source value must not clobber an optional
    /// target field, so the assignment is skipped instead.
    fn from_field(&self, field: &FieldDescriptor, target_has_default: bool) -> Resolution {
        if self.direction == Direction::Update && target_has_default && field.ty.is_optional() {
            return Resolution::Field {
                ty: field.ty.strip_optional().clone(),
                field: field.clone(),
                only_if_set: true,
            };
        }
        Resolution::Field { ty: field.ty.clone(), field: field.clone(), only_if_set: false }
    }

    fn source_field(&self, name: &str) -> Result<&FieldDescriptor> {
        self.source.fields.get(name).ok_or_else(|| Error::UnknownSourceField {
            source_class: self.source.name().to_string(),
            target_class: self.target.name().to_string(),
            field: name.to_string(),
        })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{self, DataclassBuilder};
    use crate::types::Namespace;

    fn pair(ns: &mut Namespace) -> (ClassDescriptor, ClassDescriptor) {
        let source = DataclassBuilder::new("Source")
            .field("x", "int")
            .field("maybe", "Optional[int]")
            .field("other", "str")
            .build(ns)
            .unwrap();
        let target = DataclassBuilder::new("Target")
            .field("x", "int")
            .field_with_default("maybe", "Optional[int]", Value::None)
            .field("renamed", "str")
            .field_with_default("extra_only", "int", 0)
            .build(ns)
            .unwrap();
        (adapters::describe(&source).unwrap(), adapters::describe(&target).unwrap())
    }

    #[test]
    fn same_name_then_defaults() {
        let mut ns = Namespace::new();
        let (source, target) = pair(&mut ns);
        let overrides = Overrides::new().with("renamed", FieldOverride::source("other"));
        let plan = build_plan(&source, &target, &overrides, Direction::Create).unwrap();
        assert!(matches!(plan.entries["x"], Resolution::Field { only_if_set: false, .. }));
        assert!(matches!(plan.entries["extra_only"], Resolution::Default));
        match &plan.entries["renamed"] {
            Resolution::Field { field, .. } => assert_eq!(field.attribute_name, "other"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_fields_are_reported_together() {
        let mut ns = Namespace::new();
        let (source, target) = pair(&mut ns);
        let err = build_plan(&source, &target, &Overrides::new(), Direction::Update).unwrap_err();
        match err {
            Error::IncompleteMapping { fields, .. } => assert_eq!(fields, ["renamed", "extra_only"]),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn unknown_override_keys_are_reported_together() {
        let mut ns = Namespace::new();
        let (source, target) = pair(&mut ns);
        let overrides = Overrides::new().with("nope", ignore()).with("zilch", ignore());
        let err = build_plan(&source, &target, &overrides, Direction::Create).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The override keys 'nope', 'zilch' are not fields of 'Target' (mapping from 'Source')"
        );
    }

    #[test]
    fn unknown_source_field() {
        let mut ns = Namespace::new();
        let (source, target) = pair(&mut ns);
        let overrides = Overrides::new().with("renamed", FieldOverride::source("missing"));
        let err = build_plan(&source, &target, &overrides, Direction::Create).unwrap_err();
        assert_eq!(err.to_string(), "'missing' of mapping in 'Target' doesn't exist in 'Source'");
    }

    #[test]
    fn ignoring_required_fields_only_when_updating() {
        let mut ns = Namespace::new();
        let (source, target) = pair(&mut ns);
        let overrides = Overrides::new()
            .with("renamed", init_with_default())
            .with("extra_only", ignore());
        let err = build_plan(&source, &target, &overrides, Direction::Create).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'renamed' of 'Target' cannot be set to init_with_default(), as it has no default"
        );
        let plan = build_plan(&source, &target, &overrides, Direction::Update).unwrap();
        assert!(matches!(plan.entries["renamed"], Resolution::Default));
    }

    #[test]
    fn update_skips_absent_optional_sources() {
        let mut ns = Namespace::new();
        let (source, target) = pair(&mut ns);
        let overrides = Overrides::new()
            .with("renamed", FieldOverride::source("other"))
            .with("extra_only", ignore());
        let plan = build_plan(&source, &target, &overrides, Direction::Update).unwrap();
        match &plan.entries["maybe"] {
            Resolution::Field { ty, only_if_set, .. } => {
                assert!(*only_if_set);
                assert!(!ty.is_optional());
            }
            other => panic!("unexpected {other:?}"),
        }
        let plan = build_plan(&source, &target, &overrides, Direction::Create).unwrap();
        assert!(matches!(plan.entries["maybe"], Resolution::Field { only_if_set: false, .. }));
    }

    #[test]
    fn assume_not_none_strips_optional() {
        let mut ns = Namespace::new();
        let (source, target) = pair(&mut ns);
        let overrides = Overrides::new()
            .with("x", assume_not_none(Some("maybe")))
            .with("renamed", FieldOverride::source("other"));
        let plan = build_plan(&source, &target, &overrides, Direction::Create).unwrap();
        match &plan.entries["x"] {
            Resolution::Field { field, ty, .. } => {
                assert_eq!(field.attribute_name, "maybe");
                assert!(field.ty.is_optional());
                assert!(!ty.is_optional());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
