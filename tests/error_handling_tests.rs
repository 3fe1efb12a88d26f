//! Error Handling Tests
//!
//! No input should panic the pipeline: every malformed input surfaces a
//! typed error, diagnostics name the failing field, and nothing partial
//! is ever emitted.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use metrica::adapter;
use metrica::pipeline::{NoExistingEntries, Pipeline};
use metrica::widget::parse_widgets;
use metrica::{
    AttributeValueInput, Cardinality, Datatype, Definition, EvalLimits, Field, FieldInput,
    MetricEntryInput, PipelineError, SchemaCatalog,
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

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
}

fn catalog() -> SchemaCatalog {
    let mut cat = SchemaCatalog::new();
    cat.register_definition(Definition::attribute(1, "int_attr", Datatype::Int))
        .unwrap();
    cat.register_definition(Definition::metric(21, "EST")).unwrap();
    cat.register_definition(Definition::metric(30, "TIM")).unwrap();
    cat.register_field(Field::input(100, 21, "adv", 1, Cardinality::OPTIONAL))
        .unwrap();
    cat.register_field(Field::input(102, 21, "work", 30, Cardinality::at_least(0)))
        .unwrap();
    cat.register_field(Field::input(203, 30, "time_type", 1, Cardinality::at_least(0)))
        .unwrap();
    cat
}

// ============================================================================
// Adapter rejects garbage without panicking
// ============================================================================

#[test]
fn adapter_rejects_garbage_inputs() {
    let cat = catalog();
    let limits = EvalLimits::default();
    let cases = vec![
        "",
        "   \n\t\n  ",
        ";;;",
        "EST;adv",
        "EST;adv:not_an_int",
        "EST:;adv:1",
        "!!!",
        "EST;adv:1;x;y",
    ];
    for source in cases {
        let result = adapter::parse_input(&cat, source, date(), &limits);
        assert!(result.is_err(), "input {:?} should be rejected", source);
    }
}

#[test]
fn adapter_rejects_malformed_timing_lines() {
    let cat = catalog();
    let limits = EvalLimits::default();
    let cases = vec![
        "EST;adv:1\n14001500 t30\n",
        "EST;adv:1\n9-10 t30\n",
        "EST;adv:1\n1400-1500\n",
        "EST;adv:1\n1400-1500 t30 | x | y | z\n",
        "EST;adv:1\n1400-1400 t0\n",
    ];
    for source in cases {
        let result = adapter::parse_input(&cat, source, date(), &limits);
        assert!(result.is_err(), "block {:?} should be rejected", source);
    }
}

#[test]
fn block_line_limit_is_enforced() {
    let cat = catalog();
    let limits = EvalLimits {
        max_block_lines: 3,
        ..EvalLimits::default()
    };
    let source = "EST;adv:1\n0900-0930 t30\n0930-1000 t30\n1000-1030 t30\n";
    let err = adapter::parse_input(&cat, source, date(), &limits).unwrap_err();
    assert!(matches!(err, PipelineError::Parse { .. }));
}

// ============================================================================
// Widget parser rejects garbage
// ============================================================================

#[test]
fn widget_parser_rejects_garbage() {
    let cases = vec![
        "garbage\n",
        "WIDGET noquotes\ntims = TIM\n\"n\": int = 1\nEND\n",
        "WIDGET \"W\"\n\"n\": int = 1\nEND\n",
        "WIDGET \"W\"\ntims = TIM\n\"n\": double = 1\nEND\n",
        "WIDGET \"W\"\ntims = TIM\nn: int = 1\nEND\n",
    ];
    for source in cases {
        assert!(
            parse_widgets(source).is_err(),
            "widget source {:?} should be rejected",
            source
        );
    }
}

#[test]
fn widget_parse_errors_carry_line_numbers() {
    let source = "WIDGET \"W\"\ntims = TIM\ngarbage here\nEND\n";
    match parse_widgets(source).unwrap_err() {
        PipelineError::Parse { line, .. } => assert_eq!(line, 3),
        other => panic!("expected Parse error, got {:?}", other),
    }
}

// ============================================================================
// Formula errors carry field diagnostics
// ============================================================================

#[test]
fn formula_errors_name_the_failing_field() {
    let mut cat = catalog();
    cat.register_definition(Definition::attribute(2, "float_attr", Datatype::Float))
        .unwrap();
    cat.register_field(Field::formula(103, 21, "ratio", 2, "self.adv / 0"))
        .unwrap();
    let input = MetricEntryInput::new("EST", day())
        .with_field(FieldInput::single("adv", AttributeValueInput::int(5)));
    let err = Pipeline::new(&cat, &NoExistingEntries).run(&input).unwrap_err();
    match err {
        PipelineError::Formula {
            field,
            field_name,
            formula,
            message,
        } => {
            assert_eq!(field, Some(103));
            assert_eq!(field_name.as_deref(), Some("ratio"));
            assert_eq!(formula.as_deref(), Some("self.adv / 0"));
            assert!(message.contains("division by zero"));
        }
        other => panic!("expected Formula error, got {:?}", other),
    }
}

#[test]
fn formula_length_limit_is_enforced() {
    let mut cat = catalog();
    cat.register_definition(Definition::attribute(2, "float_attr", Datatype::Float))
        .unwrap();
    let long = format!("1 {}", "+ 1 ".repeat(100));
    cat.register_field(Field::formula(103, 21, "long", 2, long)).unwrap();
    let limits = EvalLimits {
        max_formula_length: 64,
        ..EvalLimits::default()
    };
    let input = MetricEntryInput::new("EST", day());
    let err = Pipeline::new(&cat, &NoExistingEntries)
        .with_limits(limits)
        .run(&input)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Formula { .. }));
}

// ============================================================================
// Error display
// ============================================================================

#[test]
fn error_messages_render_their_context() {
    let subdivision = PipelineError::Subdivision {
        field: 1,
        field_name: "proj".into(),
        formula: "subdivision[2]".into(),
        message: "index 2 out of range for subdivision of length 1".into(),
    };
    assert!(subdivision.to_string().contains("proj"));
    assert!(subdivision.to_string().contains("out of range"));

    let resolution = PipelineError::InstanceResolution {
        field: 1,
        field_name: "book".into(),
        metric_definition: 10,
        metric_code: "BOOK".into(),
        identifier: "Dune".into(),
        match_count: 0,
    };
    assert!(resolution.to_string().contains("BOOK"));
    assert!(resolution.to_string().contains("0 matches"));

    let cardinality = PipelineError::Cardinality {
        field: 1,
        field_name: "pages".into(),
        min: 1,
        max: None,
        actual: 0,
    };
    assert!(cardinality.to_string().contains("[1, inf]"));

    let bounded = PipelineError::Cardinality {
        field: 1,
        field_name: "pages".into(),
        min: 1,
        max: Some(1),
        actual: 2,
    };
    assert!(bounded.to_string().contains("[1, 1]"));

    let parse = PipelineError::parse(3, "no tokens found", "1400-1500");
    assert!(parse.to_string().contains("line 3"));
}

// ============================================================================
// Atomicity
// ============================================================================

#[test]
fn failing_blocks_emit_no_inputs() {
    let cat = catalog();
    // line 3 overlaps: the whole block is rejected, including valid line 2
    let source = "EST;adv:1\n0900-1000 t60\n0930-1030 t60\n";
    let result = adapter::parse_input(&cat, source, date(), &EvalLimits::default());
    assert!(result.is_err());
}

#[test]
fn failing_pipeline_runs_expose_only_the_error() {
    let mut cat = catalog();
    cat.register_definition(Definition::attribute(2, "str_attr", Datatype::String))
        .unwrap();
    cat.register_field(Field::formula(104, 21, "proj", 2, "subdivision[9]"))
        .unwrap();
    let input = MetricEntryInput::new("EST", day())
        .with_subdivision("TFG")
        .with_field(FieldInput::single("adv", AttributeValueInput::int(5)));
    let result = Pipeline::new(&cat, &NoExistingEntries).run(&input);
    assert!(matches!(result, Err(PipelineError::Subdivision { .. })));
}
