//! Runtime class definitions: the "live classes" mappings are defined between.
//!
//! A [`ClassDef`] is produced by one of the flavor builders in
//! [`crate::adapters`] and carries everything needed both to describe the
//! class for mapping and to construct instances of it at runtime.
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::meta::{ConstructionStrategy, Flavor};
use crate::types::{ClassRef, FieldType};
use crate::value::{Instance, Value};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

pub type Validator = Arc<dyn Fn(&Instance) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

/// One attribute of a class, already resolved to a [`FieldType`].
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub ty: FieldType,
    pub default: Option<DefaultValue>,
    pub alias: Option<String>,
    /// Accepted by the constructor.
    pub init: bool,
    pub required: bool,
}

#[derive(Clone, Default)]
pub struct ModelOptions {
    pub populate_by_name: bool,
    pub validators: Vec<Validator>,
}

#[derive(Debug, Clone)]
pub enum ClassBody {
    Dataclass,
    Model(ModelOptions),
    Orm,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    handle: ClassRef,
    slots: Vec<Slot>,
    body: ClassBody,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "Value({})", value.repr()),
            Self::Factory(_) => f.write_str("Factory(<fn>)"),
        }
    }
}

impl fmt::Debug for ModelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelOptions")
            .field("populate_by_name", &self.populate_by_name)
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl ClassDef {
    pub(crate) fn new(handle: ClassRef, slots: Vec<Slot>, body: ClassBody) -> Arc<Self> {
        Arc::new(Self { handle, slots, body })
    }

    pub fn class(&self) -> &ClassRef {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn body(&self) -> &ClassBody {
        &self.body
    }

    pub fn flavor(&self) -> Flavor {
        match self.body {
            ClassBody::Dataclass => Flavor::Dataclass,
            ClassBody::Model(_) => Flavor::Model,
            ClassBody::Orm => Flavor::Orm,
        }
    }

    /// Strategy used when the class is constructed directly by user code.
    pub fn default_strategy(&self) -> ConstructionStrategy {
        ConstructionStrategy::Validating
    }

    /// Constructs an instance the way calling the class would.
    pub fn construct<K: Into<String>>(
        &self,
        args: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Value> {
        let args = args.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.instantiate(args, self.default_strategy())
    }

    /// Keyword-argument construction. Missing fields fall back to their
    /// defaults; unknown or missing required arguments are errors.
    pub fn instantiate(
        &self,
        mut args: IndexMap<String, Value>,
        strategy: ConstructionStrategy,
    ) -> Result<Value> {
        let mut fields = IndexMap::with_capacity(self.slots.len());
        let mut fields_set = BTreeSet::new();
        for slot in &self.slots {
            let provided = if slot.init {
                self.accepted_params(slot, strategy)
                    .into_iter()
                    .find_map(|param| args.shift_remove(param))
            } else {
                None
            };
            let value = match (provided, &slot.default) {
                (Some(value), _) => {
                    fields_set.insert(slot.name.clone());
                    value
                }
                (None, Some(default)) => default.produce(),
                (None, None) if !slot.init => Value::None,
                (None, None) => {
                    return Err(Error::Construction {
                        class: self.name().to_string(),
                        message: format!("missing required argument '{}'", slot.name),
                    });
                }
            };
            fields.insert(slot.name.clone(), value);
        }
        if let Some(unknown) = args.keys().next() {
            return Err(Error::Construction {
                class: self.name().to_string(),
                message: format!("unexpected keyword argument '{unknown}'"),
            });
        }
        let instance = Instance::new(self.handle.clone(), fields, fields_set);
        if strategy == ConstructionStrategy::Validating {
            self.validate(&instance)?;
        }
        Ok(Value::Instance(instance))
    }

    /// Parameter names the constructor accepts for `slot`.
    pub fn accepted_params<'s>(&self, slot: &'s Slot, strategy: ConstructionStrategy) -> Vec<&'s str> {
        match (&self.body, &slot.alias, strategy) {
            (ClassBody::Model(_), Some(_), ConstructionStrategy::BypassValidation) => {
                vec![slot.name.as_str()]
            }
            (ClassBody::Model(options), Some(alias), ConstructionStrategy::Validating) => {
                if options.populate_by_name {
                    vec![alias.as_str(), slot.name.as_str()]
                } else {
                    vec![alias.as_str()]
                }
            }
            _ => vec![slot.name.as_str()],
        }
    }

    fn validate(&self, instance: &Instance) -> Result<()> {
        let ClassBody::Model(options) = &self.body else {
            return Ok(());
        };
        for validator in &options.validators {
            validator(instance).map_err(|message| Error::Validation {
                class: self.name().to_string(),
                message,
            })?;
        }
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
