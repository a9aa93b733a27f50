use provenance_engine::ast::{AssignOp, Expr, ExprKind, Stmt};
use provenance_engine::operation::StaticValue;
use provenance_engine::{
    instrument_program, instrument_source, parse_program, traverse, ExecutionPolicy,
    InstrumentOptions, Interpreter, OperationArena, OperationId, OperationLog, Program,
    ProvenanceError, TrackingContext,
};
use pretty_assertions::assert_eq;

const PROGRAMS: &[&str] = &[
    "var greeting = 'Hello'; var name = 'world'; greeting + ', ' + name + '!';",
    "function counter() { var n = 0; return function () { n += 1; return n; }; }
     var c = counter(); c(); c(); c();",
    "var o = { first: 'Ada', last: 'Lovelace',
               get full() { return this.first + ' ' + this.last; },
               set full(v) { this.first = v; } };
     o.full = 'Augusta'; o.full;",
    "var out = '';
     for (var i = 0; i < 10; i++) { if (i == 2) continue; if (i > 5) break; out += i; }
     out;",
    "var keys = []; var src = { a: 1, b: 2, c: 3 };
     for (var k in src) { keys.push(k + '=' + src[k]); }
     keys.join('&');",
    "var parts = ['a', 'b']; parts.push('c'); parts[3] = 'd';
     parts.slice(1, 3).join('-') + parts.length;",
    "var x = 10; x -= 4; x *= 3; x /= 2; x;",
    "var s = '  Mixed Case  '; s.trim().toLowerCase().slice(0, 5).toUpperCase();",
    "var caught; try { null.prop; } catch (e) { caught = 'caught'; } caught;",
    "function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); } fib(10);",
    "var t = typeof missing; var u = typeof 'x'; t + '/' + u;",
    "var a = 0; var b = a || 'fallback'; var c = b && 'second'; c;",
    "function greet(p) { if (!p) { return 'nobody'; } return 'hi ' + p; }
     greet('') + ' / ' + greet('bob');",
    "var obj = { n: 1 }; obj.n++; obj.n;",
];

fn run_with(program: &Program) -> (String, Interpreter) {
    let mut interp = Interpreter::new(ExecutionPolicy::default());
    let outcome = interp.run(program).unwrap();
    (outcome.value.to_display_string(), interp)
}

#[test]
fn instrumented_programs_behave_like_plain_ones() {
    for src in PROGRAMS {
        let plain = parse_program(src).unwrap();
        let instrumented = instrument_program(&plain, &InstrumentOptions::default()).unwrap();

        let (expected, plain_interp) = run_with(&plain);
        let (actual, instrumented_interp) = run_with(&instrumented);
        assert_eq!(actual, expected, "program: {src}");
        assert!(plain_interp.tracking().logs().is_empty(), "program: {src}");
        assert!(!instrumented_interp.tracking().logs().is_empty(), "program: {src}");
    }
}

#[test]
fn plain_results_are_as_expected() {
    let expected = [
        "Hello, world!",
        "3",
        "Augusta Lovelace",
        "01345",
        "a=1&b=2&c=3",
        "b-c4",
        "9",
        "MIXED",
        "caught",
        "55",
        "undefined/string",
        "second",
        "nobody / hi bob",
        "2",
    ];
    for (src, expected) in PROGRAMS.iter().zip(expected) {
        let (actual, _) = run_with(&parse_program(src).unwrap());
        assert_eq!(actual, expected, "program: {src}");
    }
}

#[test]
fn invalid_assignment_targets_fail_fast() {
    let program = Program {
        body: vec![Stmt::Expr(Expr::generated(ExprKind::Assign {
            op: AssignOp::Assign,
            target: Box::new(Expr::generated(ExprKind::String("k".to_string()))),
            value: Box::new(Expr::generated(ExprKind::Number(1.0))),
        }))],
    };
    let err = instrument_program(&program, &InstrumentOptions::default()).unwrap_err();
    assert!(matches!(err, ProvenanceError::Unsupported(_)), "{err}");
}

#[test]
fn unknown_operators_fail_fast_at_runtime() {
    let mut program = instrument_source("1 + 2;", &InstrumentOptions::default()).unwrap();
    let Stmt::Expr(Expr {
        kind: ExprKind::Operation(op),
        ..
    }) = &mut program.body[0]
    else {
        panic!("expected an instrumented binary expression");
    };
    op.static_args
        .insert("operator".to_string(), StaticValue::from("**"));

    let mut interp = Interpreter::new(ExecutionPolicy::default());
    let err = interp.run(&program).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unsupported construct: unknown binary expression operator `**`"
    );
}

#[test]
fn unsupported_errors_are_not_catchable() {
    let mut program =
        instrument_source("try { 1 + 2; } catch (e) {}", &InstrumentOptions::default()).unwrap();
    let Stmt::Try { block, .. } = &mut program.body[0] else {
        panic!("expected try statement");
    };
    let Stmt::Expr(Expr {
        kind: ExprKind::Operation(op),
        ..
    }) = &mut block[0]
    else {
        panic!("expected an instrumented binary expression");
    };
    op.static_args
        .insert("operator".to_string(), StaticValue::from("^"));

    let mut interp = Interpreter::new(ExecutionPolicy::default());
    assert!(matches!(
        interp.run(&program),
        Err(ProvenanceError::Unsupported(_))
    ));
}

#[test]
fn instrumenting_twice_is_rejected() {
    let once = instrument_source("var a = 'x';", &InstrumentOptions::default()).unwrap();
    let err = instrument_program(&once, &InstrumentOptions::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unsupported construct: program is already instrumented"
    );
}

#[test]
fn logs_survive_a_json_round_trip() {
    let program = instrument_source(
        "function tag(s) { return '<' + s + '>'; } var o = { v: 'x' }; o.v += 'y'; tag(o.v);",
        &InstrumentOptions::default(),
    )
    .unwrap();
    let mut interp = Interpreter::new(ExecutionPolicy::default());
    let origin = interp.run(&program).unwrap().origin.unwrap();

    let before: Vec<(OperationId, usize)> = traverse(interp.tracking().logs(), origin, 2)
        .map(|step| (step.operation.id, step.char_index))
        .collect();

    let logs = interp.tracking_mut().take_logs();
    let json = serde_json::to_string(&logs).unwrap();
    let decoded: Vec<OperationLog> = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, logs);

    let mut arena = OperationArena::default();
    for log in decoded {
        arena.insert(log);
    }
    let after: Vec<(OperationId, usize)> = traverse(&arena, origin, 2)
        .map(|step| (step.operation.id, step.char_index))
        .collect();
    assert_eq!(after, before);
    assert!(after.len() > 3);
}

#[test]
fn log_json_uses_camel_case_kinds() {
    let program = instrument_source("'a';", &InstrumentOptions::default()).unwrap();
    let mut interp = Interpreter::with_tracking(
        ExecutionPolicy::default(),
        TrackingContext::starting_at(OperationId(40)),
    );
    interp.run(&program).unwrap();
    let logs = interp.into_tracking().take_logs();
    let json = serde_json::to_value(&logs).unwrap();
    assert_eq!(
        json,
        serde_json::json!([{
            "id": 40,
            "kind": "stringLiteral",
            "args": { "value": { "value": { "type": "string", "value": "a" }, "origin": null } },
            "result": { "type": "string", "value": "a" },
            "loc": { "line": 1, "column": 1 }
        }])
    );
}

#[test]
fn locations_are_optional() {
    let program = instrument_source(
        "'a';",
        &InstrumentOptions {
            preserve_locations: false,
        },
    )
    .unwrap();
    let mut interp = Interpreter::new(ExecutionPolicy::default());
    interp.run(&program).unwrap();
    assert!(interp.tracking().logs().iter().all(|log| log.loc.is_none()));
}

#[test]
fn compound_member_assignments_other_than_add_fail_fast() {
    let src = "var o = { k: 5 }; var seen = 'none';
               try { o.k -= 1; } catch (e) { seen = 'caught'; }
               seen;";
    let (plain, _) = run_with(&parse_program(src).unwrap());
    assert_eq!(plain, "none");

    let program = instrument_source(src, &InstrumentOptions::default()).unwrap();
    let mut interp = Interpreter::new(ExecutionPolicy::default());
    let err = interp.run(&program).unwrap_err();
    assert!(matches!(err, ProvenanceError::Unsupported(_)), "{err}");
    assert_eq!(
        err.to_string(),
        "Unsupported construct: unknown assignment operator `-=` for property targets"
    );
}

#[test]
fn deeply_nested_sources_are_rejected_before_instrumentation() {
    let src = format!("var s = 'a'{};", " + 'a'".repeat(1000));
    let err = instrument_source(&src, &InstrumentOptions::default()).unwrap_err();
    assert!(matches!(err, ProvenanceError::Parse(_)), "{err}");

    let src = format!("var s = 'a'{}; s;", " + 'a'".repeat(30));
    let program = instrument_source(&src, &InstrumentOptions::default()).unwrap();
    let (value, _) = run_with(&program);
    assert_eq!(value, "a".repeat(31));
}
