//! Validated models: aliased constructor parameters, validators, and tracking
//! of which fields were explicitly set.
use std::sync::Arc;

use super::{Adapter, claim_handle, classify_field, field_descriptor};
use crate::class::{ClassBody, ClassDef, DefaultValue, ModelOptions, Slot, Validator};
use crate::error::{Error, Result};
use crate::meta::{AssignmentHook, ClassDescriptor, ConstructionStrategy, Flavor};
use crate::types::{ClassRef, Namespace};
use crate::value::{Instance, Value};

#[derive(Debug, Clone)]
struct FieldDecl {
    name: String,
    annotation: String,
    default: Option<DefaultValue>,
    alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelBuilder {
    name: String,
    handle: Option<ClassRef>,
    fields: Vec<FieldDecl>,
    options: ModelOptions,
}

impl ModelBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            handle: None,
            fields: Vec::new(),
            options: ModelOptions::default(),
        }
    }

    pub fn with_handle(handle: ClassRef) -> Self {
        Self { name: handle.name().to_string(), handle: Some(handle), ..Self::new("") }
    }

    pub fn field(self, name: &str, annotation: &str) -> Self {
        self.field_decl(name, annotation, None, None)
    }

    pub fn field_with_default(self, name: &str, annotation: &str, default: impl Into<Value>) -> Self {
        self.field_decl(name, annotation, Some(DefaultValue::Value(default.into())), None)
    }

    pub fn field_with_alias(self, name: &str, annotation: &str, alias: &str) -> Self {
        self.field_decl(name, annotation, None, Some(alias.to_string()))
    }

    pub fn field_decl(
        mut self,
        name: &str,
        annotation: &str,
        default: Option<DefaultValue>,
        alias: Option<String>,
    ) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            annotation: annotation.to_string(),
            default,
            alias,
        });
        self
    }

    pub fn populate_by_name(mut self, enabled: bool) -> Self {
        self.options.populate_by_name = enabled;
        self
    }

    pub fn validator(
        mut self,
        validator: impl Fn(&Instance) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        let validator: Validator = Arc::new(validator);
        self.options.validators.push(validator);
        self
    }

    pub fn build(self, ns: &mut Namespace) -> Result<Arc<ClassDef>> {
        let handle = claim_handle(ns, &self.name, self.handle);
        let slots = self
            .fields
            .into_iter()
            .map(|decl| -> Result<Slot> {
                Ok(Slot {
                    ty: classify_field(&decl.annotation, ns)?,
                    required: decl.default.is_none(),
                    name: decl.name,
                    default: decl.default,
                    alias: decl.alias,
                    init: true,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ClassDef::new(handle, slots, ClassBody::Model(self.options)))
    }
}

pub struct ModelAdapter;

impl Adapter for ModelAdapter {
    fn name(&self) -> &'static str {
        "model"
    }

    fn supports(&self, class: &ClassDef) -> bool {
        matches!(class.body(), ClassBody::Model(_))
    }

    fn describe(&self, class: &ClassDef) -> Result<ClassDescriptor> {
        let ClassBody::Model(options) = class.body() else {
            return Err(Error::NotAClass {
                class: class.name().to_string(),
                reason: "not a model".to_string(),
            });
        };
        // without validators there is nothing to run, so skip validation
        let construction = if options.validators.is_empty() {
            ConstructionStrategy::BypassValidation
        } else {
            ConstructionStrategy::Validating
        };
        let fields = class
            .slots()
            .iter()
            .map(|slot| {
                let param = class.accepted_params(slot, construction)[0];
                (slot.name.clone(), field_descriptor(slot, param))
            })
            .collect();
        Ok(ClassDescriptor {
            class: class.class().clone(),
            qualified_name: class.name().to_string(),
            flavor: Flavor::Model,
            fields,
            construction,
            hook: AssignmentHook::OnlyIfSet,
        })
    }
}
