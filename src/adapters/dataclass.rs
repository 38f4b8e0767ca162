//! Plain record classes: fields with optional defaults or default factories,
//! and fields excluded from the constructor.
use std::sync::Arc;

use super::{Adapter, claim_handle, classify_field, field_descriptor};
use crate::class::{ClassBody, ClassDef, DefaultValue, Slot};
use crate::error::Result;
use crate::meta::{AssignmentHook, ClassDescriptor, ConstructionStrategy, Flavor};
use crate::types::{ClassRef, Namespace};
use crate::value::Value;

#[derive(Debug, Clone)]
struct FieldDecl {
    name: String,
    annotation: String,
    default: Option<DefaultValue>,
    init: bool,
}

#[derive(Debug, Clone)]
pub struct DataclassBuilder {
    name: String,
    handle: Option<ClassRef>,
    fields: Vec<FieldDecl>,
}

impl DataclassBuilder {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), handle: None, fields: Vec::new() }
    }

    /// Builds under a handle obtained from [`Namespace::declare`].
    pub fn with_handle(handle: ClassRef) -> Self {
        Self { name: handle.name().to_string(), handle: Some(handle), fields: Vec::new() }
    }

    pub fn field(self, name: &str, annotation: &str) -> Self {
        self.push(name, annotation, None, true)
    }

    pub fn field_with_default(self, name: &str, annotation: &str, default: impl Into<Value>) -> Self {
        self.push(name, annotation, Some(DefaultValue::Value(default.into())), true)
    }

    pub fn field_with_factory(
        self,
        name: &str,
        annotation: &str,
        factory: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.push(name, annotation, Some(DefaultValue::Factory(Arc::new(factory))), true)
    }

    /// A field the constructor does not accept; it can only be assigned
    /// after construction.
    pub fn non_init_field(self, name: &str, annotation: &str, default: Option<Value>) -> Self {
        self.push(name, annotation, default.map(DefaultValue::Value), false)
    }

    pub(crate) fn field_decl(
        self,
        name: &str,
        annotation: &str,
        default: Option<DefaultValue>,
        init: bool,
    ) -> Self {
        self.push(name, annotation, default, init)
    }

    fn push(mut self, name: &str, annotation: &str, default: Option<DefaultValue>, init: bool) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            annotation: annotation.to_string(),
            default,
            init,
        });
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
                    alias: None,
                    init: decl.init,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ClassDef::new(handle, slots, ClassBody::Dataclass))
    }
}

pub struct DataclassAdapter;

impl Adapter for DataclassAdapter {
    fn name(&self) -> &'static str {
        "dataclass"
    }

    fn supports(&self, class: &ClassDef) -> bool {
        matches!(class.body(), ClassBody::Dataclass)
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
            flavor: Flavor::Dataclass,
            fields,
            construction: ConstructionStrategy::Validating,
            hook: AssignmentHook::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Builtin, FieldType};

    #[test]
    fn describe_dataclass_fields() {
        let mut ns = Namespace::new();
        let def = DataclassBuilder::new("Foo")
            .field("x", "int")
            .field_with_default("y", "Optional[str]", Value::None)
            .field_with_factory("zs", "List[int]", || Value::list([]))
            .non_init_field("w", "int", Some(Value::Int(0)))
            .build(&mut ns)
            .unwrap();
        let desc = DataclassAdapter.describe(&def).unwrap();
        assert!(desc.fields["x"].required);
        assert!(!desc.fields["y"].required);
        assert_eq!(desc.fields["y"].ty, FieldType::optional(Builtin::Str.ty()));
        assert!(!desc.fields["zs"].required);
        assert!(!desc.fields["w"].settable_via_constructor);
        assert_eq!(desc.fields["x"].initializer_param_name, "x");
    }

    #[test]
    fn self_reference_resolves_to_own_handle() {
        let mut ns = Namespace::new();
        let def = DataclassBuilder::new("Node")
            .field_with_default("next", "Optional[Node]", Value::None)
            .build(&mut ns)
            .unwrap();
        assert_eq!(def.slots()[0].ty, FieldType::optional(FieldType::class(def.class())));
    }

    #[test]
    fn unsupported_annotation_fails_at_definition() {
        let mut ns = Namespace::new();
        let err = DataclassBuilder::new("Foo").field("x", "Tuple[int, ...]").build(&mut ns).unwrap_err();
        assert!(err.is_definition_error());
    }
}
