use provenance_engine::{
    instrument_source, traverse, ExecutionPolicy, InstrumentOptions, Interpreter, OperationId,
    OperationKind, TrackingContext,
};
use provenance_store::{LogStore, StoreError, StoreOptions, TraverseRequest};
use pretty_assertions::assert_eq;

/// Run `src` instrumented with log ids starting at `first_id`; returns the final origin and
/// the drained logs, plus the in-memory traversal of `char_index` for comparison.
fn execute(
    src: &str,
    first_id: u64,
    char_index: usize,
) -> (OperationId, Vec<provenance_engine::OperationLog>, Vec<(OperationId, usize)>) {
    let program = instrument_source(src, &InstrumentOptions::default()).unwrap();
    let mut interp = Interpreter::with_tracking(
        ExecutionPolicy::default(),
        TrackingContext::starting_at(OperationId(first_id)),
    );
    let origin = interp.run(&program).unwrap().origin.unwrap();
    let expected = traverse(interp.tracking().logs(), origin, char_index)
        .map(|step| (step.operation.id, step.char_index))
        .collect();
    (origin, interp.tracking_mut().take_logs(), expected)
}

#[test]
fn saved_logs_can_be_reopened_and_traversed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("logs.json");

    let (first, logs, first_expected) =
        execute("var name = 'Ada'; 'Hello ' + name;", 1, 7);
    let (second, more_logs, second_expected) = execute(
        "function shout(s) { return s + '!'; } var r = shout('hey'); r;",
        1_000,
        3,
    );

    let mut store = LogStore::open(&path).unwrap();
    assert!(store.is_empty());
    let stored = store.store_logs(logs) + store.store_logs(more_logs);
    assert_eq!(store.len(), stored);
    store.save().unwrap();

    let reopened = LogStore::open(&path).unwrap();
    assert_eq!(reopened.len(), stored);

    let response = reopened
        .traverse(&TraverseRequest {
            log_id: first,
            char_index: 7,
        })
        .unwrap();
    let steps: Vec<_> = response
        .steps
        .iter()
        .map(|step| (step.operation_log.id, step.char_index))
        .collect();
    assert_eq!(steps, first_expected);
    let last = response.steps.last().unwrap();
    assert_eq!(last.operation_log.kind, OperationKind::StringLiteral);
    assert_eq!(last.operation_log.result.display(), "Ada");
    assert_eq!(last.char_index, 1);

    let response = reopened
        .traverse(&TraverseRequest {
            log_id: second,
            char_index: 3,
        })
        .unwrap();
    let steps: Vec<_> = response
        .steps
        .iter()
        .map(|step| (step.operation_log.id, step.char_index))
        .collect();
    assert_eq!(steps, second_expected);
    assert_eq!(
        response.steps.last().unwrap().operation_log.result.display(),
        "!"
    );
}

#[test]
fn traverse_responses_serialize_for_transport() {
    let (origin, logs, _) = execute("'ab' + 'cd';", 1, 0);
    let mut store = LogStore::new(StoreOptions::default());
    store.store_logs(logs);

    let response = store
        .traverse(&TraverseRequest {
            log_id: origin,
            char_index: 2,
        })
        .unwrap();
    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"operationLog\""));
    assert!(json.contains("\"charIndex\":0"));
    let decoded: provenance_store::TraverseResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, response);
}

#[test]
fn corrupt_and_foreign_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "{ not json").unwrap();
    assert!(matches!(LogStore::open(&corrupt), Err(StoreError::Json(_))));

    let future = dir.path().join("future.json");
    std::fs::write(&future, r#"{"version": 99, "logs": []}"#).unwrap();
    assert!(matches!(
        LogStore::open(&future),
        Err(StoreError::UnsupportedVersion(99))
    ));
}
