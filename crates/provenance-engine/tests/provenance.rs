use provenance_engine::{
    instrument_source, traverse, ExecutionPolicy, InstrumentOptions, Interpreter, OperationId,
    OperationKind, OperationLookup, RunOutcome, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn run(src: &str) -> (Interpreter, RunOutcome) {
    let program = instrument_source(src, &InstrumentOptions::default()).unwrap();
    let mut interp = Interpreter::new(ExecutionPolicy::default());
    let outcome = interp.run(&program).unwrap();
    (interp, outcome)
}

fn kinds(interp: &Interpreter, origin: OperationId, char_index: usize) -> Vec<OperationKind> {
    traverse(interp.tracking().logs(), origin, char_index)
        .map(|step| step.operation.kind)
        .collect()
}

/// Result text and index of the record a traversal ends at.
fn source_of(interp: &Interpreter, origin: OperationId, char_index: usize) -> (String, usize) {
    let last = traverse(interp.tracking().logs(), origin, char_index)
        .last()
        .unwrap();
    (last.operation.result.display(), last.char_index)
}

#[test]
fn literal_is_a_single_terminal_step() {
    let (interp, outcome) = run("'hello';");
    let origin = outcome.origin.unwrap();
    for i in 0..5 {
        let steps: Vec<_> = traverse(interp.tracking().logs(), origin, i)
            .map(|step| (step.operation.kind, step.char_index))
            .collect();
        assert_eq!(steps, vec![(OperationKind::StringLiteral, i)]);
    }
}

proptest! {
    #[test]
    fn concatenation_splits_indices_between_operands(
        a in "[a-z é😀]{0,6}",
        b in "[a-z é😀]{0,6}",
    ) {
        let src = format!("var a = '{a}'; var b = '{b}'; a + b;");
        let (interp, outcome) = run(&src);
        let joined: Vec<char> = format!("{a}{b}").chars().collect();
        prop_assert_eq!(&outcome.value, &Value::String(joined.iter().collect()));

        let a_len = a.chars().count();
        for (i, expected) in joined.iter().enumerate() {
            let (text, index) = source_of(&interp, outcome.origin.unwrap(), i);
            if i < a_len {
                prop_assert_eq!(&text, &a);
                prop_assert_eq!(index, i);
            } else {
                prop_assert_eq!(&text, &b);
                prop_assert_eq!(index, i - a_len);
            }
            prop_assert_eq!(text.chars().nth(index), Some(*expected));
        }
    }
}

#[test]
fn identifier_reassignment_keeps_both_sources() {
    let (interp, outcome) = run("var x = 'a'; x = x + 'b'; x;");
    assert_eq!(outcome.value, Value::from("ab"));
    let origin = outcome.origin.unwrap();

    assert_eq!(
        kinds(&interp, origin, 0),
        vec![
            OperationKind::Identifier,
            OperationKind::AssignmentExpression,
            OperationKind::BinaryExpression,
            OperationKind::Identifier,
            OperationKind::StringLiteral,
        ]
    );
    assert_eq!(source_of(&interp, origin, 0), ("a".to_string(), 0));
    assert_eq!(source_of(&interp, origin, 1), ("b".to_string(), 0));
}

#[test]
fn compound_string_assignment_applies_the_concatenation_rule() {
    let (interp, outcome) = run("var s = 'ab'; s += 'cd'; s;");
    assert_eq!(outcome.value, Value::from("abcd"));
    let origin = outcome.origin.unwrap();
    assert_eq!(
        kinds(&interp, origin, 3),
        vec![
            OperationKind::Identifier,
            OperationKind::AssignmentExpression,
            OperationKind::StringLiteral,
        ]
    );
    assert_eq!(source_of(&interp, origin, 1), ("ab".to_string(), 1));
    assert_eq!(source_of(&interp, origin, 3), ("cd".to_string(), 1));
}

#[test]
fn property_writes_are_followed_through_the_table() {
    let (interp, outcome) = run("var obj = {}; obj.k = 'v1'; obj.k = obj.k + '2'; obj.k;");
    assert_eq!(outcome.value, Value::from("v12"));
    let origin = outcome.origin.unwrap();

    assert_eq!(
        kinds(&interp, origin, 1),
        vec![
            OperationKind::MemberExpression,
            OperationKind::AssignmentExpression,
            OperationKind::BinaryExpression,
            OperationKind::MemberExpression,
            OperationKind::AssignmentExpression,
            OperationKind::StringLiteral,
        ]
    );
    assert_eq!(source_of(&interp, origin, 1), ("v1".to_string(), 1));
    assert_eq!(source_of(&interp, origin, 2), ("2".to_string(), 0));
}

#[test]
fn overwritten_property_value_stays_reachable() {
    let (interp, _) = run("var o = { k: 'old' }; o.k = 'new';");
    let logs = interp.tracking().logs();
    let target = logs
        .iter()
        .find(|log| log.kind == OperationKind::MemexpAsLeftAssExp)
        .unwrap();
    assert_eq!(target.result.display(), "old");
    let (text, index) = {
        let last = traverse(logs, target.id, 2).last().unwrap();
        (last.operation.result.display(), last.char_index)
    };
    assert_eq!((text.as_str(), index), ("old", 2));
}

#[test]
fn call_arguments_flow_through_parameters_and_return() {
    let (interp, outcome) = run("function f(p) { return p + '!'; } var r = f('hi'); r;");
    assert_eq!(outcome.value, Value::from("hi!"));
    let origin = outcome.origin.unwrap();

    assert_eq!(
        kinds(&interp, origin, 1),
        vec![
            OperationKind::Identifier,
            OperationKind::CallExpression,
            OperationKind::ReturnStatement,
            OperationKind::BinaryExpression,
            OperationKind::Identifier,
            OperationKind::FunctionArgument,
            OperationKind::StringLiteral,
        ]
    );
    assert_eq!(source_of(&interp, origin, 1), ("hi".to_string(), 1));
    assert_eq!(source_of(&interp, origin, 2), ("!".to_string(), 0));
}

#[test]
fn method_results_trace_back_to_object_literal_properties() {
    let (interp, outcome) =
        run("var o = { name: 'abc', read: function () { return this.name; } }; o.read();");
    assert_eq!(outcome.value, Value::from("abc"));
    let origin = outcome.origin.unwrap();
    assert_eq!(
        kinds(&interp, origin, 1),
        vec![
            OperationKind::CallExpression,
            OperationKind::ReturnStatement,
            OperationKind::MemberExpression,
            OperationKind::ObjectExpression,
            OperationKind::StringLiteral,
        ]
    );
}

#[test]
fn native_results_are_opaque() {
    let (interp, outcome) = run("var s = 'abc'; s.toUpperCase();");
    assert_eq!(outcome.value, Value::from("ABC"));
    assert_eq!(
        kinds(&interp, outcome.origin.unwrap(), 0),
        vec![OperationKind::CallExpression]
    );
}

#[test]
fn array_elements_are_enumerated_individually() {
    let (interp, outcome) = run("[1, 2, 3];");
    let logs = interp.tracking().logs();
    let array = logs.operation(outcome.origin.unwrap()).unwrap();
    assert_eq!(array.kind, OperationKind::ArrayExpression);

    let entries = array.arguments_array();
    let names: Vec<_> = entries.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["element0", "element1", "element2"]);
    let values: Vec<_> = entries
        .iter()
        .map(|entry| {
            let element = logs.operation(entry.origin.unwrap()).unwrap();
            assert_eq!(element.kind, OperationKind::NumericLiteral);
            element.result.display()
        })
        .collect();
    assert_eq!(values, vec!["1", "2", "3"]);

    assert_eq!(traverse(logs, array.id, 0).count(), 1);
}

#[test]
fn traversal_is_repeatable() {
    let (interp, outcome) = run(
        "function wrap(s) { return '[' + s + ']'; }
         var o = { v: 'x' }; o.v += 'y'; wrap(o.v);",
    );
    assert_eq!(outcome.value, Value::from("[xy]"));
    let origin = outcome.origin.unwrap();
    for i in 0..4 {
        let first: Vec<_> = traverse(interp.tracking().logs(), origin, i)
            .map(|step| (step.operation.id, step.char_index))
            .collect();
        let second: Vec<_> = traverse(interp.tracking().logs(), origin, i)
            .map(|step| (step.operation.id, step.char_index))
            .collect();
        assert_eq!(first, second);
    }
    assert_eq!(source_of(&interp, origin, 1), ("x".to_string(), 0));
    assert_eq!(source_of(&interp, origin, 2), ("y".to_string(), 0));
    assert_eq!(source_of(&interp, origin, 3), ("]".to_string(), 0));
}

#[test]
fn out_of_range_indices_pass_through() {
    let (interp, outcome) = run("'ab' + 'cd';");
    let (text, index) = source_of(&interp, outcome.origin.unwrap(), 10);
    assert_eq!((text.as_str(), index), ("cd", 8));
}

#[test]
fn update_expressions_clear_identifier_tracking() {
    let (interp, outcome) = run("var n = 1; n++; n;");
    assert_eq!(outcome.value, Value::Number(2.0));
    assert_eq!(
        kinds(&interp, outcome.origin.unwrap(), 0),
        vec![OperationKind::Identifier]
    );
}

#[test]
fn weak_property_table_releases_dropped_objects() {
    let program = instrument_source("var o = { k: 'v' }; o.k;", &InstrumentOptions::default())
        .unwrap();
    let mut interp = Interpreter::new(ExecutionPolicy::default());
    interp.run(&program).unwrap();
    assert_eq!(interp.tracking().property_table().tracked_object_count(), 1);

    let release = instrument_source("o = null;", &InstrumentOptions::default()).unwrap();
    interp.run(&release).unwrap();
    interp.tracking_mut().property_table_mut().sweep();
    assert_eq!(interp.tracking().property_table().tracked_object_count(), 0);
}

#[test]
fn top_level_return_value_is_traced() {
    let (interp, outcome) = run("var s = 'ab'; return s + 'c'; 'ignored';");
    assert_eq!(outcome.value, Value::from("abc"));
    let origin = outcome.origin.unwrap();
    assert_eq!(
        kinds(&interp, origin, 2),
        vec![
            OperationKind::ReturnStatement,
            OperationKind::BinaryExpression,
            OperationKind::StringLiteral,
        ]
    );
    assert_eq!(source_of(&interp, origin, 1), ("ab".to_string(), 1));
}

#[test]
fn objects_held_by_finished_calls_are_released() {
    let (mut interp, outcome) = run(
        "function read() {
             var o = { k: 'v' };
             function helper() { return o.k; }
             return helper();
         }
         read();",
    );
    assert_eq!(outcome.value, Value::from("v"));
    interp.tracking_mut().property_table_mut().sweep();
    assert_eq!(interp.tracking().property_table().tracked_object_count(), 0);
}
