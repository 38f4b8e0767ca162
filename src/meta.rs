//! Adapter-independent description of a class and its fields.
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ir::{Expr, Stmt};
use crate::types::{ClassRef, FieldType};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub attribute_name: String,
    pub ty: FieldType,
    /// Must be supplied when constructing; no default exists.
    pub required: bool,
    /// Keyword under which the constructor accepts this field.
    pub initializer_param_name: String,
    /// `false` for fields that can only be assigned after construction.
    pub settable_via_constructor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructionStrategy {
    /// Run the class's own validation while constructing
    Validating,
    /// Construct without running validators
    BypassValidation,
}

/// Post-processing a target class applies to every emitted field assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentHook {
    None,
    /// Skip the assignment unless the source field was explicitly set.
    OnlyIfSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    Dataclass,
    Model,
    Orm,
}

#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub class: ClassRef,
    pub qualified_name: String,
    pub flavor: Flavor,
    pub fields: IndexMap<String, FieldDescriptor>,
    pub construction: ConstructionStrategy,
    pub hook: AssignmentHook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Build a fresh target object
    Create,
    /// Mutate an existing target object in place
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapperMode {
    Create,
    Update,
    #[default]
    CreateAndUpdate,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' of type '{}'", self.attribute_name, self.ty)
    }
}

impl ClassDescriptor {
    pub fn name(&self) -> &str {
        self.class.name()
    }

    /// Lets the target class wrap an emitted assignment of `target_field`
    /// from `source_field`. `source_obj` is the expression for the source
    /// object inside the generated method.
    pub fn post_process(
        &self,
        stmt: Stmt,
        source: &ClassDescriptor,
        source_field: &FieldDescriptor,
        target_field: &FieldDescriptor,
        source_obj: Expr,
    ) -> Stmt {
        match self.hook {
            AssignmentHook::None => stmt,
            AssignmentHook::OnlyIfSet => {
                let applies = source.flavor == Flavor::Model
                    && source_field.ty.is_optional()
                    && target_field.ty.is_optional()
                    && !target_field.required;
                if !applies {
                    return stmt;
                }
                Stmt::when(
                    Expr::IsSet {
                        obj: Box::new(source_obj),
                        field: source_field.attribute_name.clone(),
                    },
                    vec![stmt],
                )
            }
        }
    }
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MapperMode {
    pub fn directions(self) -> &'static [Direction] {
        match self {
            Self::Create => &[Direction::Create],
            Self::Update => &[Direction::Update],
            Self::CreateAndUpdate => &[Direction::Create, Direction::Update],
        }
    }
}
