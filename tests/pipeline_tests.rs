//! Entry Pipeline Integration Tests
//!
//! End-to-end runs over small schemas: hierarchy indexing, instance
//! resolution, formula application, cardinality enforcement, provisional
//! id provenance, and persist-ready flattening.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use metrica::entry::ScalarValue;
use metrica::pipeline::{InMemoryExistingEntries, NoExistingEntries, Pipeline, PipelineTrace};
use metrica::{
    AttributeValueInput, Cardinality, Datatype, Definition, Field, FieldInput, MetricEntryInput,
    PipelineError, ResolvedEntry, SchemaCatalog,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn day() -> NaiveDateTime {
    NaiveDateTime::new(
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
        NaiveTime::MIN,
    )
}

/// WORK -> EST schema with a hierarchy formula field `proj` and room to
/// add more fields per test.
fn est_catalog() -> SchemaCatalog {
    let mut cat = SchemaCatalog::new();
    cat.register_definition(Definition::attribute(1, "adv_attr", Datatype::Int))
        .unwrap();
    cat.register_definition(Definition::attribute(2, "proj_attr", Datatype::String))
        .unwrap();
    cat.register_definition(Definition::metric(20, "WORK")).unwrap();
    cat.register_definition(Definition::metric(21, "EST").with_parent(20))
        .unwrap();
    cat.register_field(Field::input(100, 21, "adv", 1, Cardinality::OPTIONAL))
        .unwrap();
    cat.register_field(Field::formula(101, 21, "proj", 2, "subdivision[0]"))
        .unwrap();
    cat
}

fn book_read_catalog() -> SchemaCatalog {
    let mut cat = SchemaCatalog::new();
    cat.register_definition(Definition::attribute(1, "title_attr", Datatype::String))
        .unwrap();
    cat.register_definition(Definition::attribute(2, "pages_attr", Datatype::Int))
        .unwrap();
    cat.register_definition(Definition::metric(10, "BOOK").with_primary_identifier(100))
        .unwrap();
    cat.register_definition(Definition::metric(11, "READ")).unwrap();
    cat.register_field(Field::input(100, 10, "title", 1, Cardinality::ONE))
        .unwrap();
    cat.register_field(Field::input(110, 11, "book", 10, Cardinality::ONE))
        .unwrap();
    cat.register_field(Field::input(111, 11, "pages_read", 2, Cardinality::ONE))
        .unwrap();
    cat.validate().unwrap();
    cat
}

fn book_tree(catalog: &SchemaCatalog, title: &str) -> ResolvedEntry {
    let input = MetricEntryInput::new("BOOK", day())
        .with_field(FieldInput::single("title", AttributeValueInput::string(title)));
    Pipeline::new(catalog, &NoExistingEntries).run(&input).unwrap()
}

fn attribute_of<'a>(node: &'a ResolvedEntry, field_name: &str, catalog: &SchemaCatalog) -> &'a ResolvedEntry {
    let field = catalog
        .field_of_metric_by_name(node.entry.definition, field_name)
        .unwrap();
    node.children_of_field(field.id).next().unwrap()
}

// ============================================================================
// Hierarchy indexing
// ============================================================================

#[test]
fn hierarchy_formula_takes_subdivision_token() {
    let cat = est_catalog();
    let input = MetricEntryInput::new("EST", day()).with_subdivision("TFG/coding");
    let tree = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap();

    let proj = attribute_of(&tree, "proj", &cat);
    let attr = proj.attribute.as_ref().unwrap();
    assert_eq!(attr.value.get(), Some(ScalarValue::Str("TFG".into())));
    // synthesized by the hierarchy populator: id from its counter
    assert_eq!(proj.entry.id, -1000);
    assert_eq!(proj.entry.parent_entry, Some(tree.entry.id));
}

#[test]
fn hierarchy_index_out_of_range_fails() {
    let mut cat = est_catalog();
    cat.register_field(Field::formula(102, 21, "proj2", 2, "subdivision[2]"))
        .unwrap();
    let input = MetricEntryInput::new("EST", day()).with_subdivision("TFG/coding");
    let err = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap_err();
    match err {
        PipelineError::Subdivision { field_name, message, .. } => {
            assert_eq!(field_name, "proj2");
            assert!(message.contains("index 2"));
            assert!(message.contains("length 2"));
        }
        other => panic!("expected Subdivision error, got {:?}", other),
    }
}

#[test]
fn division_and_path_formulas_index_the_schema_chain() {
    let mut cat = est_catalog();
    cat.register_field(Field::formula(103, 21, "area", 2, "division[0]"))
        .unwrap();
    cat.register_field(Field::formula(104, 21, "first_sub", 2, "path[2]"))
        .unwrap();
    let input = MetricEntryInput::new("EST", day()).with_subdivision("TFG/coding");
    let tree = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap();

    // division = [WORK, EST], path = [WORK, EST, TFG, coding]
    let area = attribute_of(&tree, "area", &cat).attribute.as_ref().unwrap();
    assert_eq!(area.value.get(), Some(ScalarValue::Str("WORK".into())));
    let first_sub = attribute_of(&tree, "first_sub", &cat).attribute.as_ref().unwrap();
    assert_eq!(first_sub.value.get(), Some(ScalarValue::Str("TFG".into())));
}

// ============================================================================
// Instance resolution
// ============================================================================

#[test]
fn single_match_splices_existing_tree() {
    let cat = book_read_catalog();
    let oracle = InMemoryExistingEntries::new().with_tree(book_tree(&cat, "Dune"));
    let input = MetricEntryInput::new("READ", day())
        .with_field(FieldInput::single("book", AttributeValueInput::string("Dune")))
        .with_field(FieldInput::single("pages_read", AttributeValueInput::int(42)));
    let tree = Pipeline::new(&cat, &oracle).run(&input).unwrap();

    let book = attribute_of(&tree, "book", &cat);
    assert!(book.is_metric());
    assert!(book.attribute.is_none());
    assert_eq!(book.entry.definition, 10);
    assert_eq!(book.entry.parent_entry, Some(tree.entry.id));
    // the spliced instance keeps its own subtree
    let title = attribute_of(book, "title", &cat).attribute.as_ref().unwrap();
    assert_eq!(title.value.get(), Some(ScalarValue::Str("Dune".into())));
}

#[test]
fn zero_matches_fail_resolution() {
    let cat = book_read_catalog();
    let oracle = InMemoryExistingEntries::new();
    let input = MetricEntryInput::new("READ", day())
        .with_field(FieldInput::single("book", AttributeValueInput::string("Dune")))
        .with_field(FieldInput::single("pages_read", AttributeValueInput::int(1)));
    let err = Pipeline::new(&cat, &oracle).run(&input).unwrap_err();
    match err {
        PipelineError::InstanceResolution {
            field_name,
            metric_code,
            identifier,
            match_count,
            ..
        } => {
            assert_eq!(field_name, "book");
            assert_eq!(metric_code, "BOOK");
            assert_eq!(identifier, "Dune");
            assert_eq!(match_count, 0);
        }
        other => panic!("expected InstanceResolution error, got {:?}", other),
    }
}

#[test]
fn two_matches_fail_resolution() {
    let cat = book_read_catalog();
    let oracle = InMemoryExistingEntries::new()
        .with_tree(book_tree(&cat, "Dune"))
        .with_tree(book_tree(&cat, "Dune"));
    let input = MetricEntryInput::new("READ", day())
        .with_field(FieldInput::single("book", AttributeValueInput::string("Dune")))
        .with_field(FieldInput::single("pages_read", AttributeValueInput::int(1)));
    let err = Pipeline::new(&cat, &oracle).run(&input).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InstanceResolution { match_count: 2, .. }
    ));
}

#[test]
fn inline_metric_subtree_passes_resolution_untouched() {
    let cat = book_read_catalog();
    let nested = MetricEntryInput::new("BOOK", day())
        .with_field(FieldInput::single("title", AttributeValueInput::string("Dune")));
    let input = MetricEntryInput::new("READ", day())
        .with_field(FieldInput::single("book", AttributeValueInput::nested(nested)))
        .with_field(FieldInput::single("pages_read", AttributeValueInput::int(7)));
    // empty oracle: would fail if the inline subtree were looked up
    let tree = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap();
    let book = attribute_of(&tree, "book", &cat);
    assert!(book.is_metric());
}

// ============================================================================
// Formula application
// ============================================================================

#[test]
fn formula_writes_typed_attribute_child() {
    let mut cat = book_read_catalog();
    cat.register_definition(Definition::attribute(3, "double_attr", Datatype::Int))
        .unwrap();
    cat.register_field(Field::formula(112, 11, "double_pages", 3, "self.pages_read * 2"))
        .unwrap();
    let oracle = InMemoryExistingEntries::new().with_tree(book_tree(&cat, "Dune"));
    let input = MetricEntryInput::new("READ", day())
        .with_field(FieldInput::single("book", AttributeValueInput::string("Dune")))
        .with_field(FieldInput::single("pages_read", AttributeValueInput::int(21)));
    let tree = Pipeline::new(&cat, &oracle).run(&input).unwrap();

    let double = attribute_of(&tree, "double_pages", &cat);
    assert_eq!(
        double.attribute.as_ref().unwrap().value.get(),
        Some(ScalarValue::Int(42))
    );
    // synthesized by the formula applier: id from its counter
    assert_eq!(double.entry.id, -2000);
}

#[test]
fn formula_may_reference_earlier_formula_on_same_node() {
    let mut cat = book_read_catalog();
    cat.register_definition(Definition::attribute(3, "num_attr", Datatype::Float))
        .unwrap();
    cat.register_field(Field::formula(112, 11, "plus_one", 3, "self.pages_read + 1"))
        .unwrap();
    cat.register_field(Field::formula(113, 11, "doubled", 3, "plus_one * 2"))
        .unwrap();
    let oracle = InMemoryExistingEntries::new().with_tree(book_tree(&cat, "Dune"));
    let input = MetricEntryInput::new("READ", day())
        .with_field(FieldInput::single("book", AttributeValueInput::string("Dune")))
        .with_field(FieldInput::single("pages_read", AttributeValueInput::int(10)));
    let tree = Pipeline::new(&cat, &oracle).run(&input).unwrap();

    let doubled = attribute_of(&tree, "doubled", &cat);
    assert_eq!(
        doubled.attribute.as_ref().unwrap().value.get(),
        Some(ScalarValue::Float(22.0))
    );
}

#[test]
fn formula_evaluating_to_null_fails() {
    let mut cat = est_catalog();
    cat.register_definition(Definition::attribute(3, "num_attr", Datatype::Float))
        .unwrap();
    // root has no parent: parent resolves to null, navigation stays null
    cat.register_field(Field::formula(105, 21, "broken", 3, "parent.adv"))
        .unwrap();
    let input = MetricEntryInput::new("EST", day()).with_subdivision("TFG");
    let err = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap_err();
    match err {
        PipelineError::Formula { message, field_name, .. } => {
            assert!(message.contains("null"));
            assert_eq!(field_name.as_deref(), Some("broken"));
        }
        other => panic!("expected Formula error, got {:?}", other),
    }
}

#[test]
fn formula_producing_a_list_fails() {
    let mut cat = est_catalog();
    cat.register_field(Field::input(106, 21, "xs", 1, Cardinality::at_least(0)))
        .unwrap();
    cat.register_definition(Definition::attribute(3, "num_attr", Datatype::Float))
        .unwrap();
    cat.register_field(Field::formula(107, 21, "bad", 3, "self.xs * 2"))
        .unwrap();
    let input = MetricEntryInput::new("EST", day())
        .with_subdivision("TFG")
        .with_field(FieldInput::new(
            "xs",
            vec![AttributeValueInput::int(1), AttributeValueInput::int(2)],
        ));
    let err = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap_err();
    match err {
        PipelineError::Formula { message, .. } => {
            assert!(message.contains("single value"), "message: {}", message);
        }
        other => panic!("expected Formula error, got {:?}", other),
    }
}

#[test]
fn fractional_result_for_int_field_fails() {
    let mut cat = est_catalog();
    cat.register_definition(Definition::attribute(3, "int_attr", Datatype::Int))
        .unwrap();
    cat.register_field(Field::formula(108, 21, "half", 3, "3 / 2"))
        .unwrap();
    let input = MetricEntryInput::new("EST", day()).with_subdivision("TFG");
    let err = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap_err();
    assert!(matches!(err, PipelineError::Formula { .. }));
}

// ============================================================================
// Cardinality
// ============================================================================

#[test]
fn too_many_instances_fail_cardinality() {
    let cat = book_read_catalog();
    let oracle = InMemoryExistingEntries::new().with_tree(book_tree(&cat, "Dune"));
    let input = MetricEntryInput::new("READ", day())
        .with_field(FieldInput::single("book", AttributeValueInput::string("Dune")))
        .with_field(FieldInput::new(
            "pages_read",
            vec![AttributeValueInput::int(1), AttributeValueInput::int(2)],
        ));
    let err = Pipeline::new(&cat, &oracle).run(&input).unwrap_err();
    match err {
        PipelineError::Cardinality { field_name, min, max, actual, .. } => {
            assert_eq!(field_name, "pages_read");
            assert_eq!((min, max, actual), (1, Some(1), 2));
        }
        other => panic!("expected Cardinality error, got {:?}", other),
    }
}

#[test]
fn missing_required_instance_fails_cardinality() {
    let cat = book_read_catalog();
    let oracle = InMemoryExistingEntries::new().with_tree(book_tree(&cat, "Dune"));
    let input = MetricEntryInput::new("READ", day())
        .with_field(FieldInput::single("book", AttributeValueInput::string("Dune")));
    let err = Pipeline::new(&cat, &oracle).run(&input).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Cardinality { actual: 0, .. }
    ));
}

// ============================================================================
// Tree shape, ids, timestamps
// ============================================================================

#[test]
fn builder_assigns_ids_depth_first_and_normalizes_timestamps() {
    let cat = book_read_catalog();
    let afternoon = NaiveDate::from_ymd_opt(2024, 3, 9)
        .unwrap()
        .and_hms_opt(15, 45, 10)
        .unwrap();
    let nested = MetricEntryInput::new("BOOK", afternoon)
        .with_field(FieldInput::single("title", AttributeValueInput::string("Dune")));
    let input = MetricEntryInput::new("READ", afternoon)
        .with_field(FieldInput::single("book", AttributeValueInput::nested(nested)))
        .with_field(FieldInput::single("pages_read", AttributeValueInput::int(5)));
    let tree = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap();

    // READ=1, BOOK=2, title=3, pages_read=4 (left-to-right, depth-first)
    assert_eq!(tree.entry.id, 1);
    let book = attribute_of(&tree, "book", &cat);
    assert_eq!(book.entry.id, 2);
    assert_eq!(attribute_of(book, "title", &cat).entry.id, 3);
    assert_eq!(attribute_of(&tree, "pages_read", &cat).entry.id, 4);

    fn assert_midnight(node: &ResolvedEntry) {
        assert_eq!(node.entry.timestamp.time(), NaiveTime::MIN);
        for child in &node.children {
            assert_midnight(child);
        }
    }
    assert_midnight(&tree);
}

#[test]
fn unknown_definition_and_field_are_rejected() {
    let cat = est_catalog();
    let err = Pipeline::new(&cat, &NoExistingEntries)
        .run(&MetricEntryInput::new("NOPE", day()))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Formula { .. }));

    let input = MetricEntryInput::new("EST", day())
        .with_subdivision("TFG")
        .with_field(FieldInput::single("mystery", AttributeValueInput::int(1)));
    let err = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap_err();
    assert!(matches!(err, PipelineError::Formula { .. }));
}

#[test]
fn legacy_children_attach_without_field_slot() {
    let cat = book_read_catalog();
    let mut input = MetricEntryInput::new("READ", day())
        .with_field(FieldInput::single("pages_read", AttributeValueInput::int(5)));
    // a required `book` reference is still needed: use an inline subtree
    input.fields.push(FieldInput::single(
        "book",
        AttributeValueInput::nested(MetricEntryInput::new("BOOK", day()).with_field(
            FieldInput::single("title", AttributeValueInput::string("Dune")),
        )),
    ));
    input.children.push(
        MetricEntryInput::new("BOOK", day())
            .with_field(FieldInput::single("title", AttributeValueInput::string("Other"))),
    );
    let tree = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap();
    let legacy = tree.children.iter().find(|c| c.field.is_none()).unwrap();
    assert!(legacy.is_metric());
    assert_eq!(legacy.entry.parent_entry, Some(tree.entry.id));
}

// ============================================================================
// Trace and flattening
// ============================================================================

#[test]
fn trace_records_stage_counters() {
    let cat = est_catalog();
    let input = MetricEntryInput::new("EST", day())
        .with_subdivision("TFG/coding")
        .with_field(FieldInput::single("adv", AttributeValueInput::int(7)));
    let mut trace = PipelineTrace::default();
    Pipeline::new(&cat, &NoExistingEntries)
        .run_traced(&input, &mut trace)
        .unwrap();
    assert_eq!(trace.built_nodes, 2);
    assert_eq!(trace.hierarchy_populated, 1);
    assert_eq!(trace.instances_resolved, 0);
    assert_eq!(trace.final_nodes, 3);
    assert!(trace.cardinality_checked);
}

#[test]
fn flatten_preserves_order_and_specializations() {
    let cat = est_catalog();
    let input = MetricEntryInput::new("EST", day())
        .with_subdivision("TFG/coding")
        .with_field(FieldInput::single("adv", AttributeValueInput::int(7)));
    let tree = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap();
    let batch = metrica::persist::flatten(&tree, 99);

    assert_eq!(batch.entries.len(), tree.node_count());
    assert_eq!(batch.entries[0].id, tree.entry.id);
    assert!(batch.entries.iter().all(|row| row.user_id == 99));
    assert_eq!(batch.metric_entries.len(), 1);
    assert_eq!(batch.attribute_entries.len(), 2);
    // exactly one typed column populated per attribute row
    for row in &batch.attribute_entries {
        let populated = usize::from(row.value_int.is_some())
            + usize::from(row.value_float.is_some())
            + usize::from(row.value_string.is_some())
            + usize::from(row.value_bool.is_some())
            + usize::from(row.value_timestamp.is_some())
            + usize::from(row.value_hierarchy.is_some());
        assert_eq!(populated, 1);
    }
}
