//! Integration tests for the stage lifecycle state machine

mod common;

use edgeflow_core::{
    Batch, LifecycleState, RecordBatchMaker, Stage, StageError, StageInstance,
};

use common::{context, RecordingOrigin};

#[test]
fn test_operations_follow_init() {
    let origin = RecordingOrigin::default();
    let calls = origin.calls.clone();
    let mut instance = StageInstance::new(Stage::Origin(Box::new(origin)));
    assert_eq!(instance.state(), LifecycleState::Created);

    let mut maker = RecordBatchMaker::new();
    let err = instance.produce(None, 10, &mut maker).unwrap_err();
    assert!(matches!(err, StageError::IllegalState { operation: "produce", state: "created" }));

    assert!(instance.init(context("origin")).unwrap().is_empty());
    assert_eq!(instance.state(), LifecycleState::Initialised);

    assert_eq!(instance.produce(None, 10, &mut maker).unwrap().as_deref(), Some("recording"));
    assert_eq!(instance.state(), LifecycleState::Running);
    instance.produce(Some("recording"), 10, &mut maker).unwrap();

    instance.destroy();
    instance.destroy();
    assert_eq!(instance.state(), LifecycleState::Destroyed);
    assert_eq!(*calls.lock().unwrap(), vec!["init", "produce", "produce", "destroy"]);
}

#[test]
fn test_init_at_most_once() {
    let mut instance = StageInstance::new(Stage::Origin(Box::new(RecordingOrigin::default())));
    instance.init(context("origin")).unwrap();
    let err = instance.init(context("origin")).unwrap_err();
    assert!(matches!(err, StageError::IllegalState { operation: "init", .. }));
}

#[test]
fn test_init_with_issues_blocks_operations() {
    let mut instance = StageInstance::new(Stage::Origin(Box::new(RecordingOrigin::failing("bad url"))));
    let issues = instance.init(context("origin")).unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].to_string(), "bad url");
    assert_eq!(instance.state(), LifecycleState::Created);

    let mut maker = RecordBatchMaker::new();
    assert!(instance.produce(None, 1, &mut maker).is_err());
    assert!(instance.init(context("origin")).is_err());
}

#[test]
fn test_no_operation_after_destroy() {
    let mut instance = StageInstance::new(Stage::Origin(Box::new(RecordingOrigin::default())));
    instance.init(context("origin")).unwrap();
    instance.destroy();

    let mut maker = RecordBatchMaker::new();
    let err = instance.produce(None, 1, &mut maker).unwrap_err();
    assert!(matches!(err, StageError::IllegalState { state: "destroyed", .. }));
    assert!(instance.init(context("origin")).is_err());
}

#[test]
fn test_wrong_variant_is_rejected() {
    let mut instance = StageInstance::new(Stage::Origin(Box::new(RecordingOrigin::default())));
    instance.init(context("origin")).unwrap();
    let err = instance.write(&Batch::default()).unwrap_err();
    assert!(matches!(err, StageError::WrongVariant("destination")));
}

#[test]
fn test_drop_destroys_stage() {
    let origin = RecordingOrigin::default();
    let calls = origin.calls.clone();
    {
        let mut instance = StageInstance::new(Stage::Origin(Box::new(origin)));
        instance.init(context("origin")).unwrap();
    }
    assert_eq!(*calls.lock().unwrap(), vec!["init", "destroy"]);
}
