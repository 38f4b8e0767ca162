use std::sync::Arc;

use dataclass_mapper::convert::synthesize;
use dataclass_mapper::ir::Expr;
use dataclass_mapper::types::classify_str;
use dataclass_mapper::{
    ClassDef, Column, ColumnType, DataclassBuilder, EnumDef, EnumOverrides, Error, Extra, FieldOverride,
    MapTarget, MapperMode, ModelBuilder, Namespace, OrmBuilder, Overrides, Registry, Value, assume_not_none,
    ignore, map_to, register_mapping,
};
use pretty_assertions::assert_eq;

fn field() -> Expr {
    Expr::var("self").attr("x")
}

fn simple(ns: &mut Namespace, name: &str, annotation: &str) -> Arc<ClassDef> {
    DataclassBuilder::new(name).field("x", annotation).build(ns).unwrap()
}

// ------------------------------ Synthesis ------------------------------ //

#[test]
fn any_target_is_identity() {
    let ns = Namespace::new();
    let any = classify_str("Any", &ns).unwrap();
    for annotation in ["int", "Optional[str]", "List[Dict[str, int]]", "Tuple[int, str]"] {
        let source = classify_str(annotation, &ns).unwrap();
        let expr = synthesize(&source, &any, field(), 0, &Registry::new()).unwrap();
        assert_eq!(expr, field(), "{annotation}");
    }
}

#[test]
fn same_class_is_identity() {
    let mut ns = Namespace::new();
    let item = simple(&mut ns, "Item", "int");
    let ty = classify_str("Item", &ns).unwrap();
    assert_eq!(ty.to_string(), item.name());
    assert_eq!(synthesize(&ty, &ty, field(), 0, &Registry::new()).unwrap(), field());
}

#[test]
fn loop_variables_embed_the_depth() {
    let ns = Namespace::new();
    let ty = classify_str("List[List[int]]", &ns).unwrap();
    let expr = synthesize(&ty, &ty, field(), 0, &Registry::new()).unwrap();
    assert_eq!(expr.to_string(), "[[x1 for x1 in x0] for x0 in self.x]");

    let ty = classify_str("Set[Dict[str, int]]", &ns).unwrap();
    let expr = synthesize(&ty, &ty, field(), 0, &Registry::new()).unwrap();
    assert_eq!(expr.to_string(), "{{k1: v1 for k1, v1 in x0.items()} for x0 in self.x}");
}

#[test]
fn optional_short_circuits_on_identity() {
    let mut ns = Namespace::new();
    let a = simple(&mut ns, "A", "int");
    let b = simple(&mut ns, "B", "int");
    let registry = Registry::new();
    registry.register(&a, &b, &Overrides::new(), MapperMode::Create).unwrap();

    let source = classify_str("Optional[A]", &ns).unwrap();
    let target = classify_str("Optional[B]", &ns).unwrap();
    let rendered = synthesize(&source, &target, field(), 0, &registry).unwrap().to_string();
    let method = format!("_map_to_B_{}", b.class().id().raw());
    assert_eq!(rendered, format!("None if self.x is None else self.x.{method}(extra)"));
}

#[test]
fn optional_unions_unwrap_then_compare_members() {
    let ns = Namespace::new();
    let source = classify_str("Optional[Union[int, str]]", &ns).unwrap();
    let target = classify_str("Union[int, str, float, None]", &ns).unwrap();
    let expr = synthesize(&source, &target, field(), 0, &Registry::new()).unwrap();
    assert_eq!(expr.to_string(), "None if self.x is None else self.x");

    let member = classify_str("int", &ns).unwrap();
    let expr = synthesize(&member, &target, field(), 0, &Registry::new()).unwrap();
    assert_eq!(expr, field());
}

// ----------------------------- Registration ---------------------------- //

#[test]
fn duplicate_registration_is_rejected_per_direction() {
    let mut ns = Namespace::new();
    let source = simple(&mut ns, "Source", "int");
    let target = simple(&mut ns, "Target", "int");
    let registry = Registry::new();
    registry.register(&source, &target, &Overrides::new(), MapperMode::Create).unwrap();
    registry.register(&source, &target, &Overrides::new(), MapperMode::Update).unwrap();

    let err = registry
        .register(&source, &target, &Overrides::new(), MapperMode::Create)
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateMapping { .. }));
    assert_eq!(err.to_string(), "There already exists a create mapping between 'Source' and 'Target'");
    assert_eq!(registry.len(), 2);
}

#[test]
fn round_trip() {
    let mut ns = Namespace::new();
    let source = simple(&mut ns, "Source", "int");
    let target = simple(&mut ns, "Target", "int");
    let registry = Registry::new();
    registry.register(&source, &target, &Overrides::new(), MapperMode::default()).unwrap();

    let five = source.construct([("x", Value::Int(5))]).unwrap();
    let mapped = registry.convert(&five, target.class(), &Extra::new()).unwrap();
    assert_eq!(mapped, target.construct([("x", Value::Int(5))]).unwrap());
}

#[test]
fn global_helpers_share_one_registry() {
    let mut ns = Namespace::new();
    let source = simple(&mut ns, "GlobalSource", "str");
    let target = simple(&mut ns, "GlobalTarget", "str");
    register_mapping(&source, &target, &Overrides::new(), MapperMode::default()).unwrap();

    let hello = source.construct([("x", Value::str("hello"))]).unwrap();
    let mut created = map_to(&hello, MapTarget::Class(target.class()), &Extra::new())
        .unwrap()
        .unwrap();
    let bye = source.construct([("x", Value::str("bye"))]).unwrap();
    assert_eq!(map_to(&bye, MapTarget::Instance(&mut created), &Extra::new()).unwrap(), None);
    assert_eq!(created.attr("x").unwrap(), &Value::str("bye"));
}

#[test]
fn nested_optional_needs_an_override() {
    let mut ns = Namespace::new();
    let source = simple(&mut ns, "Source", "Optional[int]");
    let target = DataclassBuilder::new("Target")
        .field_with_default("x", "int", 42)
        .build(&mut ns)
        .unwrap();

    let registry = Registry::new();
    let err = registry
        .register(&source, &target, &Overrides::new(), MapperMode::Create)
        .unwrap_err();
    assert!(matches!(err, Error::FieldType { .. }), "{err}");

    let overrides = Overrides::new().with("x", ignore());
    registry.register(&source, &target, &overrides, MapperMode::Create).unwrap();
    let absent = source.construct([("x", Value::None)]).unwrap();
    let mapped = registry.convert(&absent, target.class(), &Extra::new()).unwrap();
    assert_eq!(mapped.attr("x").unwrap(), &Value::Int(42));
}

#[test]
fn assume_not_none_passes_the_value_through() {
    let mut ns = Namespace::new();
    let source = simple(&mut ns, "Source", "Optional[int]");
    let target = DataclassBuilder::new("Target")
        .field_with_default("x", "int", 42)
        .build(&mut ns)
        .unwrap();
    let registry = Registry::new();
    let overrides = Overrides::new().with("x", assume_not_none(None));
    registry.register(&source, &target, &overrides, MapperMode::Create).unwrap();

    let seven = source.construct([("x", Value::Int(7))]).unwrap();
    let mapped = registry.convert(&seven, target.class(), &Extra::new()).unwrap();
    assert_eq!(mapped.attr("x").unwrap(), &Value::Int(7));
}

#[test]
fn dict_of_registered_items() {
    let mut ns = Namespace::new();
    let source_item = DataclassBuilder::new("SourceItem").field("v", "int").build(&mut ns).unwrap();
    let target_item = DataclassBuilder::new("TargetItem").field("v", "int").build(&mut ns).unwrap();
    let source = DataclassBuilder::new("Source").field("m", "Dict[str, SourceItem]").build(&mut ns).unwrap();
    let target = DataclassBuilder::new("Target").field("m", "Dict[str, TargetItem]").build(&mut ns).unwrap();

    let registry = Registry::new();
    registry.register(&source_item, &target_item, &Overrides::new(), MapperMode::Create).unwrap();
    registry.register(&source, &target, &Overrides::new(), MapperMode::Create).unwrap();

    let item = source_item.construct([("v", Value::Int(1))]).unwrap();
    let input = source.construct([("m", Value::dict([("k", item)]))]).unwrap();
    let mapped = registry.convert(&input, target.class(), &Extra::new()).unwrap();

    let expected_item = target_item.construct([("v", Value::Int(1))]).unwrap();
    let expected = target.construct([("m", Value::dict([("k", expected_item)]))]).unwrap();
    assert_eq!(mapped, expected);
}

#[test]
fn absent_nested_objects_are_not_converted() {
    let mut ns = Namespace::new();
    let a = simple(&mut ns, "A", "int");
    let b = simple(&mut ns, "B", "int");
    let source = DataclassBuilder::new("Holder").field("child", "Optional[A]").build(&mut ns).unwrap();
    let target = DataclassBuilder::new("Mirror").field("child", "Optional[B]").build(&mut ns).unwrap();
    let registry = Registry::new();
    registry.register(&a, &b, &Overrides::new(), MapperMode::Create).unwrap();
    registry.register(&source, &target, &Overrides::new(), MapperMode::Create).unwrap();

    let empty = source.construct([("child", Value::None)]).unwrap();
    let mapped = registry.convert(&empty, target.class(), &Extra::new()).unwrap();
    assert_eq!(mapped.attr("child").unwrap(), &Value::None);
}

#[test]
fn union_superset_only() {
    let mut ns = Namespace::new();
    let narrow = simple(&mut ns, "Narrow", "Union[int, str]");
    let wide = simple(&mut ns, "Wide", "Union[int, str, float]");
    let registry = Registry::new();
    registry.register(&narrow, &wide, &Overrides::new(), MapperMode::Create).unwrap();

    let err = registry
        .register(&wide, &narrow, &Overrides::new(), MapperMode::Create)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "'x' of type 'Union[int, str, float]' of 'Wide' cannot be converted to \
         'x' of type 'Union[int, str]' of 'Narrow' (create mode)"
    );
}

#[test]
fn update_falls_back_to_construction_and_fails_loudly() {
    let mut ns = Namespace::new();
    let foo_update = simple(&mut ns, "FooUpdate", "int");
    let foo = simple(&mut ns, "Foo", "int");
    let source = DataclassBuilder::new("Batch").field("items", "List[FooUpdate]").build(&mut ns).unwrap();
    let target = DataclassBuilder::new("Store").field("items", "List[Foo]").build(&mut ns).unwrap();

    let registry = Registry::new();
    registry.register(&foo_update, &foo, &Overrides::new(), MapperMode::Update).unwrap();
    let err = registry
        .register(&source, &target, &Overrides::new(), MapperMode::Update)
        .unwrap_err();
    assert!(
        err.to_string().ends_with("The mapping is missing, or only exists for update mode"),
        "{err}"
    );
}

#[test]
fn update_mode_updates_nested_objects_in_place() {
    let mut ns = Namespace::new();
    let patch = DataclassBuilder::new("Patch").field("x", "int").build(&mut ns).unwrap();
    let record = DataclassBuilder::new("Record")
        .field("x", "int")
        .field("note", "str")
        .build(&mut ns)
        .unwrap();
    let outer_patch = DataclassBuilder::new("OuterPatch").field("inner", "Patch").build(&mut ns).unwrap();
    let outer = DataclassBuilder::new("Outer").field("inner", "Record").build(&mut ns).unwrap();

    let registry = Registry::new();
    let keep_note = Overrides::new().with("note", ignore());
    registry.register(&patch, &record, &keep_note, MapperMode::Update).unwrap();
    registry.register(&outer_patch, &outer, &Overrides::new(), MapperMode::Update).unwrap();

    let inner = record
        .construct([("x", Value::Int(1)), ("note", Value::str("kept"))])
        .unwrap();
    let mut existing = outer.construct([("inner", inner)]).unwrap();
    let change = outer_patch
        .construct([("inner", patch.construct([("x", Value::Int(2))]).unwrap())])
        .unwrap();
    registry.update(&change, &mut existing, &Extra::new()).unwrap();

    let inner = existing.attr("inner").unwrap();
    assert_eq!(inner.attr("x").unwrap(), &Value::Int(2));
    assert_eq!(inner.attr("note").unwrap(), &Value::str("kept"));
}

#[test]
fn extra_reaches_objects_converted_inside_a_list() {
    let mut ns = Namespace::new();
    let a = simple(&mut ns, "A", "int");
    let b = DataclassBuilder::new("B").field("x", "int").field("tag", "str").build(&mut ns).unwrap();
    let outer = DataclassBuilder::new("Outer").field("child", "List[A]").build(&mut ns).unwrap();
    let outer_t = DataclassBuilder::new("OuterT").field("child", "List[B]").build(&mut ns).unwrap();

    let registry = Registry::new();
    let tagged = Overrides::new().with("tag", dataclass_mapper::from_extra("tag"));
    registry.register(&a, &b, &tagged, MapperMode::Create).unwrap();
    registry.register(&outer, &outer_t, &Overrides::new(), MapperMode::Create).unwrap();

    let input = outer
        .construct([("child", Value::List(vec![a.construct([("x", Value::Int(3))]).unwrap()]))])
        .unwrap();
    let extra = Extra::from([("tag".to_string(), Value::str("t"))]);
    let mapped = registry.convert(&input, outer_t.class(), &extra).unwrap();
    let Value::List(items) = mapped.attr("child").unwrap() else {
        panic!("child is not a list: {mapped:?}");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].attr("x").unwrap(), &Value::Int(3));
    assert_eq!(items[0].attr("tag").unwrap(), &Value::str("t"));

    let err = registry.convert(&input, outer_t.class(), &Extra::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "When mapping an object of 'A' to 'B' the item 'tag' needs to be provided in the `extra` dictionary"
    );
}

#[test]
fn extra_reaches_nested_in_place_updates() {
    let mut ns = Namespace::new();
    let patch = simple(&mut ns, "APatch", "int");
    let record = DataclassBuilder::new("BRec").field("x", "int").field("tag", "str").build(&mut ns).unwrap();
    let outer_patch = DataclassBuilder::new("OuterPatch").field("child", "APatch").build(&mut ns).unwrap();
    let outer = DataclassBuilder::new("OuterRec").field("child", "BRec").build(&mut ns).unwrap();

    let registry = Registry::new();
    let tagged = Overrides::new().with("tag", dataclass_mapper::from_extra("tag"));
    registry.register(&patch, &record, &tagged, MapperMode::Update).unwrap();
    registry.register(&outer_patch, &outer, &Overrides::new(), MapperMode::Update).unwrap();

    let existing_child = || {
        record
            .construct([("x", Value::Int(1)), ("tag", Value::str("old"))])
            .unwrap()
    };
    let change = outer_patch
        .construct([("child", patch.construct([("x", Value::Int(3))]).unwrap())])
        .unwrap();

    let mut existing = outer.construct([("child", existing_child())]).unwrap();
    let extra = Extra::from([("tag".to_string(), Value::str("new"))]);
    registry.update(&change, &mut existing, &extra).unwrap();
    let child = existing.attr("child").unwrap();
    assert_eq!(child.attr("x").unwrap(), &Value::Int(3));
    assert_eq!(child.attr("tag").unwrap(), &Value::str("new"));

    let mut existing = outer.construct([("child", existing_child())]).unwrap();
    let err = registry.update(&change, &mut existing, &Extra::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "When mapping an object of 'APatch' to 'BRec' the item 'tag' needs to be provided in the `extra` dictionary"
    );
}

#[test]
fn unregistered_pairs_fail_at_invocation() {
    let mut ns = Namespace::new();
    let source = simple(&mut ns, "Lonely", "int");
    let target = simple(&mut ns, "Stranger", "int");
    let value = source.construct([("x", Value::Int(1))]).unwrap();
    let err = Registry::new().convert(&value, target.class(), &Extra::new()).unwrap_err();
    assert_eq!(err.to_string(), "Object of type 'Lonely' cannot be mapped to 'Stranger'");
}

// ------------------------------- Flavors ------------------------------- //

#[test]
fn enum_fields_use_the_enum_mapping() {
    let mut ns = Namespace::new();
    let color = EnumDef::new(&mut ns, "Color", ["RED", "CYAN"]);
    let paint = EnumDef::new(&mut ns, "Paint", ["RED", "BLUE"]);
    let source = simple(&mut ns, "Car", "List[Color]");
    let target = simple(&mut ns, "Bike", "List[Paint]");

    let registry = Registry::new();
    let overrides = EnumOverrides::from([("CYAN".to_string(), "BLUE".to_string())]);
    registry.register_enum(&color, &paint, &overrides).unwrap();
    registry.register(&source, &target, &Overrides::new(), MapperMode::Create).unwrap();

    let car = source
        .construct([("x", Value::list([color.member("CYAN").unwrap(), color.member("RED").unwrap()]))])
        .unwrap();
    let bike = registry.convert(&car, target.class(), &Extra::new()).unwrap();
    assert_eq!(
        bike.attr("x").unwrap(),
        &Value::list([paint.member("BLUE").unwrap(), paint.member("RED").unwrap()])
    );
}

#[test]
fn models_keep_unset_fields_unset() {
    let mut ns = Namespace::new();
    let source = ModelBuilder::new("UserIn")
        .field("name", "str")
        .field_with_default("email", "Optional[str]", Value::None)
        .build(&mut ns)
        .unwrap();
    let target = ModelBuilder::new("UserOut")
        .field("name", "str")
        .field_with_default("email", "Optional[str]", Value::None)
        .build(&mut ns)
        .unwrap();
    let registry = Registry::new();
    registry.register(&source, &target, &Overrides::new(), MapperMode::default()).unwrap();

    let partial = source.construct([("name", Value::str("ada"))]).unwrap();
    let out = registry.convert(&partial, target.class(), &Extra::new()).unwrap();
    let out = out.as_instance().unwrap();
    assert!(out.is_set("name"));
    assert!(!out.is_set("email"));

    let explicit = source
        .construct([("name", Value::str("ada")), ("email", Value::None)])
        .unwrap();
    let out = registry.convert(&explicit, target.class(), &Extra::new()).unwrap();
    assert!(out.as_instance().unwrap().is_set("email"));
}

#[test]
fn orm_rows_fill_generated_columns_with_none() {
    let mut ns = Namespace::new();
    let dto = DataclassBuilder::new("UserDto").field("name", "str").build(&mut ns).unwrap();
    let row = OrmBuilder::new("UserRow")
        .column(Column::new("id", ColumnType::Integer).primary_key())
        .column(Column::new("name", ColumnType::String))
        .build(&mut ns)
        .unwrap();
    let registry = Registry::new();
    registry.register(&dto, &row, &Overrides::new(), MapperMode::Create).unwrap();

    let input = dto.construct([("name", Value::str("ada"))]).unwrap();
    let mapped = registry.convert(&input, row.class(), &Extra::new()).unwrap();
    assert_eq!(mapped.attr("id").unwrap(), &Value::None);
    assert_eq!(mapped.attr("name").unwrap(), &Value::str("ada"));

    let err = OrmBuilder::new("Blob")
        .column(Column::new("payload", ColumnType::Json))
        .build(&mut ns)
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedType { .. }));
}

#[test]
fn factories_and_extra() {
    let mut ns = Namespace::new();
    let source = simple(&mut ns, "Order", "int");
    let target = DataclassBuilder::new("Invoice")
        .field("x", "int")
        .field("doubled", "int")
        .field("tenant", "str")
        .build(&mut ns)
        .unwrap();
    let overrides = Overrides::new()
        .with(
            "doubled",
            FieldOverride::factory_with_source(|order| match order.attr("x") {
                Ok(Value::Int(x)) => Value::Int(x * 2),
                _ => Value::None,
            }),
        )
        .with("tenant", dataclass_mapper::from_extra("tenant"));
    let registry = Registry::new();
    registry.register(&source, &target, &overrides, MapperMode::Create).unwrap();

    let order = source.construct([("x", Value::Int(21))]).unwrap();
    let err = registry.convert(&order, target.class(), &Extra::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "When mapping an object of 'Order' to 'Invoice' the item 'tenant' needs to be provided in the `extra` dictionary"
    );

    let extra = Extra::from([("tenant".to_string(), Value::str("acme"))]);
    let invoice = registry.convert(&order, target.class(), &extra).unwrap();
    assert_eq!(invoice.attr("doubled").unwrap(), &Value::Int(42));
    assert_eq!(invoice.attr("tenant").unwrap(), &Value::str("acme"));
}
