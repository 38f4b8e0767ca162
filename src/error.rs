//! Error types for mapping definition and execution.
//!
//! Definition-time failures (unsupported annotations, incomplete or invalid
//! overrides, impossible field conversions, duplicate registrations) and
//! invocation-time failures (missing registrations, missing `extra` items,
//! construction problems) share one enum so callers can `?` through both.
use thiserror::Error;

use crate::meta::Direction;

#[derive(Error, Debug)]
pub enum Error {
    /// An annotation has no representable shape
    #[error("Field type '{annotation}' is not supported: {reason}")]
    UnsupportedType { annotation: String, reason: String },

    /// A field pairing for which no conversion could be synthesized
    #[error("{message}")]
    FieldType { message: String },

    /// Target fields that are neither matched, overridden nor defaultable
    #[error("'{target_class}' has fields without a mapping from '{source_class}': {}", quoted(.fields))]
    IncompleteMapping {
        source_class: String,
        target_class: String,
        fields: Vec<String>,
    },

    /// Override keys that are not fields of the target
    #[error("The override keys {} are not fields of '{target_class}' (mapping from '{source_class}')", quoted(.keys))]
    UnknownOverrideKey {
        source_class: String,
        target_class: String,
        keys: Vec<String>,
    },

    #[error("'{field}' of mapping in '{target_class}' doesn't exist in '{source_class}'")]
    UnknownSourceField {
        source_class: String,
        target_class: String,
        field: String,
    },

    #[error("{message}")]
    InvalidOverride { message: String },

    #[error("There already exists a {direction} mapping between '{source_class}' and '{target_class}'")]
    DuplicateMapping {
        source_class: String,
        target_class: String,
        direction: Direction,
    },

    #[error("Object of type '{source_type}' cannot be mapped to '{target_type}'")]
    NoMappingRegistered { source_type: String, target_type: String },

    #[error("'{class}' cannot be described as a mappable class: {reason}")]
    NotAClass { class: String, reason: String },

    #[error("{message}")]
    InvalidEnumMapping { message: String },

    /// Raised by generated code, e.g. a missing `extra` item
    #[error("{message}")]
    Raised { message: String },

    #[error("Cannot construct '{class}': {message}")]
    Construction { class: String, message: String },

    #[error("Validation of '{class}' failed: {message}")]
    Validation { class: String, message: String },

    /// Generated code touched a value of the wrong shape
    #[error("Runtime error: {message}")]
    Runtime { message: String },

    #[error("Schema error: {message}")]
    Schema { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime { message: message.into() }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema { message: message.into() }
    }

    /// True for failures detected while a mapping was being defined.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedType { .. }
                | Self::FieldType { .. }
                | Self::IncompleteMapping { .. }
                | Self::UnknownOverrideKey { .. }
                | Self::UnknownSourceField { .. }
                | Self::InvalidOverride { .. }
                | Self::DuplicateMapping { .. }
                | Self::NotAClass { .. }
                | Self::InvalidEnumMapping { .. }
        )
    }
}

fn quoted(names: &[String]) -> String {
    names.iter().map(|n| format!("'{n}'")).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_variants_quote_every_name() {
        let err = Error::IncompleteMapping {
            source_class: "Foo".into(),
            target_class: "Bar".into(),
            fields: vec!["x".into(), "y".into()],
        };
        assert_eq!(err.to_string(), "'Bar' has fields without a mapping from 'Foo': 'x', 'y'");
        assert!(err.is_definition_error());
    }

    #[test]
    fn no_mapping_message() {
        let err = Error::NoMappingRegistered { source_type: "Foo".into(), target_type: "Bar".into() };
        assert_eq!(err.to_string(), "Object of type 'Foo' cannot be mapped to 'Bar'");
        assert!(!err.is_definition_error());
    }
}
