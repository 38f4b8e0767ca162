//! Enum-to-enum mappings: members map by name unless overridden, and every
//! source member must end up with a target.
use std::sync::Arc;

use indexmap::IndexMap;

use crate::adapters::claim_handle;
use crate::error::{Error, Result};
use crate::types::{ClassRef, Namespace};
use crate::value::{EnumMember, Value};

pub type EnumOverrides = IndexMap<String, String>;

#[derive(Debug, Clone)]
pub struct EnumDef {
    handle: ClassRef,
    members: Vec<String>,
}

#[derive(Debug)]
pub struct EnumMapping {
    source: ClassRef,
    target: Arc<EnumDef>,
    table: IndexMap<String, String>,
}

impl EnumDef {
    pub fn new<S: Into<String>>(ns: &mut Namespace, name: &str, members: impl IntoIterator<Item = S>) -> Arc<Self> {
        Self::with_handle(claim_handle(ns, name, None), members)
    }

    pub fn with_handle<S: Into<String>>(handle: ClassRef, members: impl IntoIterator<Item = S>) -> Arc<Self> {
        Arc::new(Self { handle, members: members.into_iter().map(Into::into).collect() })
    }

    pub fn class(&self) -> &ClassRef {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m == name)
    }

    pub fn member(&self, name: &str) -> Result<Value> {
        if !self.has_member(name) {
            return Err(Error::runtime(format!("'{name}' is not a member of '{}'", self.name())));
        }
        Ok(Value::Enum(EnumMember { enum_class: self.handle.clone(), name: name.to_string() }))
    }
}

pub fn build_enum_mapping(
    source: &EnumDef,
    target: &Arc<EnumDef>,
    overrides: &EnumOverrides,
) -> Result<EnumMapping> {
    for (key, value) in overrides {
        if !source.has_member(key) {
            return Err(Error::InvalidEnumMapping {
                message: format!(
                    "The mapping key '{key}' must be a member of the source enum '{}'",
                    source.name()
                ),
            });
        }
        if !target.has_member(value) {
            return Err(Error::InvalidEnumMapping {
                message: format!(
                    "The mapping value '{value}' must be a member of the target enum '{}'",
                    target.name()
                ),
            });
        }
    }
    let mut table = IndexMap::new();
    let mut unmapped = Vec::new();
    for member in &source.members {
        match overrides.get(member) {
            Some(mapped) => {
                table.insert(member.clone(), mapped.clone());
            }
            None if target.has_member(member) => {
                table.insert(member.clone(), member.clone());
            }
            None => unmapped.push(format!("'{member}'")),
        }
    }
    if !unmapped.is_empty() {
        return Err(Error::InvalidEnumMapping {
            message: format!(
                "The members {} of the source enum '{}' don't have a mapping to '{}'",
                unmapped.join(", "),
                source.name(),
                target.name()
            ),
        });
    }
    Ok(EnumMapping { source: source.handle.clone(), target: Arc::clone(target), table })
}

impl EnumMapping {
    pub fn source(&self) -> &ClassRef {
        &self.source
    }

    pub fn target(&self) -> &ClassRef {
        &self.target.handle
    }

    pub fn apply(&self, value: &Value) -> Result<Value> {
        let Value::Enum(member) = value else {
            return Err(Error::runtime(format!("expected an enum member, found '{}'", value.type_name())));
        };
        if member.enum_class != self.source {
            return Err(Error::NoMappingRegistered {
                source_type: member.enum_class.name().to_string(),
                target_type: self.target.name().to_string(),
            });
        }
        let mapped = self.table.get(&member.name).ok_or_else(|| {
            Error::runtime(format!("'{}' is not a member of '{}'", member.name, self.source))
        })?;
        self.target.member(mapped)
    }

    pub fn render(&self) -> String {
        self.table
            .iter()
            .map(|(from, to)| format!("{}.{from} -> {}.{to}", self.source, self.target.name()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
