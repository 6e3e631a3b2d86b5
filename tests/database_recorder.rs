use std::fs;

use runlog::{
    api::metric::{linearize_metrics, ScalarMetric},
    backend::{database::artifact_blob_name, DatabaseStorage},
    tracking::Recorder,
    Observer, RunDescriptor, RunId, Value,
};
use serde_json::json;
use time::macros::datetime;

fn descriptor() -> RunDescriptor {
    RunDescriptor {
        experiment: vec![("name", "test_exp"), ("sources", "")].into_iter().collect(),
        command: "run".to_owned(),
        host: vec![("hostname", "test_host")].into_iter().collect(),
        config: vec![("a", Value::Int(1)), ("$b", 2.into()), ("c.d", 3.into())]
            .into_iter()
            .collect(),
        meta: Value::map(),
    }
}

fn recorder() -> Recorder<DatabaseStorage> {
    Recorder::new(DatabaseStorage::open_in_memory().unwrap())
}

fn logged_metrics() -> Vec<ScalarMetric> {
    let t = datetime!(1999-05-04 03:02:01 UTC);
    let entry = |name: &str, step, value, offset| ScalarMetric {
        name: name.to_owned(),
        step,
        timestamp: t + time::Duration::seconds(offset),
        value,
    };
    vec![
        entry("training.loss", 10, 1.0, 0),
        entry("training.loss", 20, 2.0, 1),
        entry("training.loss", 30, 3.0, 2),
        entry("training.accuracy", 10, 100.0, 3),
        entry("training.accuracy", 20, 200.0, 4),
        entry("training.accuracy", 30, 300.0, 5),
        entry("training.loss", 40, 10.0, 6),
        entry("training.loss", 50, 20.0, 7),
        entry("training.loss", 60, 30.0, 8),
    ]
}

#[test]
fn started_event_stores_a_safe_document() {
    let mut recorder = recorder();
    let start = datetime!(2000-01-01 00:00:00 UTC);
    let id = recorder.started_event(&descriptor(), start, None).unwrap();
    assert!(matches!(id, RunId::Text(_)));

    let storage = recorder.backend();
    assert_eq!(storage.run_count().unwrap(), 1);
    let doc = storage.load_run(&id).unwrap().unwrap();
    assert_eq!(doc["status"], "RUNNING");
    assert_eq!(doc["format"], runlog::api::run::FORMAT);
    assert_eq!(doc["start_time"], "2000-01-01T00:00:00Z");
    assert_eq!(doc["heartbeat"], json!(null));
    assert_eq!(doc["config"], json!({ "a": 1, "@b": 2, "c,d": 3 }));
    assert_eq!(doc["resources"], json!([]));
    assert_eq!(doc["artifacts"], json!([]));
}

#[test]
fn started_event_uses_the_given_id() {
    let mut recorder = recorder();
    let id = recorder
        .started_event(&descriptor(), runlog::timestamp(), Some(RunId::Number(5)))
        .unwrap();
    assert_eq!(id, RunId::Number(5));
    assert!(recorder.backend().load_run(&RunId::Number(5)).unwrap().is_some());
}

#[test]
fn lifecycle_updates_the_stored_document() {
    let mut recorder = recorder();
    let id = recorder
        .started_event(&descriptor(), runlog::timestamp(), None)
        .unwrap();

    let info: Value = vec![("my_info", vec![1, 2, 3].into()), ("nr", Value::Int(7))]
        .into_iter()
        .collect();
    recorder
        .heartbeat_event(info, "some output", datetime!(2000-01-01 00:01:00 UTC), 1337.into())
        .unwrap();
    let doc = recorder.backend().load_run(&id).unwrap().unwrap();
    assert_eq!(doc["heartbeat"], "2000-01-01T00:01:00Z");
    assert_eq!(doc["info"], json!({ "my_info": [1, 2, 3], "nr": 7 }));
    assert_eq!(doc["captured_out"], "some output");
    assert_eq!(doc["result"], 1337);

    recorder
        .completed_event(datetime!(2000-01-01 00:02:00 UTC), 42.into())
        .unwrap();
    let doc = recorder.backend().load_run(&id).unwrap().unwrap();
    assert_eq!(doc["status"], "COMPLETED");
    assert_eq!(doc["stop_time"], "2000-01-01T00:02:00Z");
    assert_eq!(doc["result"], 42);
    assert_eq!(recorder.backend().run_count().unwrap(), 1);
}

#[test]
fn interrupted_and_failed_runs_record_their_end() {
    let mut recorder = recorder();
    let id = recorder
        .started_event(&descriptor(), runlog::timestamp(), None)
        .unwrap();
    recorder
        .interrupted_event(datetime!(2000-01-01 00:03:00 UTC), "INTERRUPTED")
        .unwrap();
    let doc = recorder.backend().load_run(&id).unwrap().unwrap();
    assert_eq!(doc["status"], "INTERRUPTED");
    assert_eq!(doc["stop_time"], "2000-01-01T00:03:00Z");

    let id = recorder
        .started_event(&descriptor(), runlog::timestamp(), None)
        .unwrap();
    recorder
        .failed_event(datetime!(2000-01-01 00:04:00 UTC), "lots of errors")
        .unwrap();
    let doc = recorder.backend().load_run(&id).unwrap().unwrap();
    assert_eq!(doc["status"], "FAILED");
    assert_eq!(doc["fail_trace"], "lots of errors");
}

#[test]
fn artifacts_are_stored_as_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("setup.py");
    fs::write(&file, "print('hello')").unwrap();

    let mut recorder = recorder();
    let id = recorder
        .started_event(&descriptor(), runlog::timestamp(), None)
        .unwrap();
    recorder.artifact_event("mysetup", &file).unwrap();

    let storage = recorder.backend();
    let blob = storage.blob(&artifact_blob_name(&id, "mysetup")).unwrap();
    assert_eq!(blob.as_deref(), Some(&b"print('hello')"[..]));
    let doc = storage.load_run(&id).unwrap().unwrap();
    assert_eq!(doc["artifacts"], json!(["mysetup"]));
}

#[test]
fn resources_are_stored_with_their_digest() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.csv");
    fs::write(&file, "a,b\n1,2\n").unwrap();
    let name = file.to_string_lossy().into_owned();

    let mut recorder = recorder();
    let id = recorder
        .started_event(&descriptor(), runlog::timestamp(), None)
        .unwrap();
    recorder.resource_event(&file, Some("5eb63bbbe0")).unwrap();

    let storage = recorder.backend();
    assert!(storage.blob_exists(&name).unwrap());
    let doc = storage.load_run(&id).unwrap().unwrap();
    assert_eq!(doc["resources"], json!([[name, "5eb63bbbe0"]]));
}

#[test]
fn metrics_are_appended_and_referenced() {
    let metrics = logged_metrics();
    let mut recorder = recorder();
    let id = recorder
        .started_event(&descriptor(), runlog::timestamp(), None)
        .unwrap();
    let info: Value = vec![("my_info", vec![1, 2, 3].into()), ("nr", Value::Int(7))]
        .into_iter()
        .collect();

    recorder.log_metrics(&linearize_metrics(&metrics[..6])).unwrap();
    recorder
        .heartbeat_event(info.clone(), "some output", runlog::timestamp(), 0.into())
        .unwrap();

    let storage = recorder.backend();
    assert_eq!(storage.run_count().unwrap(), 1);
    assert_eq!(storage.metric_count().unwrap(), 2);
    let doc = storage.load_run(&id).unwrap().unwrap();
    let (loss_id, loss) = storage.metric_series(&id, "training.loss").unwrap().unwrap();
    assert!(doc["info"]["metrics"]
        .as_array()
        .unwrap()
        .contains(&json!({ "name": "training.loss", "id": loss_id })));
    assert_eq!(loss.steps, [10, 20, 30]);
    assert_eq!(loss.values, [1.0, 2.0, 3.0]);
    assert!(loss.timestamps.windows(2).all(|w| w[0] <= w[1]));
    let (_, accuracy) = storage.metric_series(&id, "training.accuracy").unwrap().unwrap();
    assert_eq!(accuracy.values, [100.0, 200.0, 300.0]);

    recorder.log_metrics(&linearize_metrics(&metrics[6..])).unwrap();
    recorder
        .heartbeat_event(info.clone(), "some output", runlog::timestamp(), 0.into())
        .unwrap();

    let storage = recorder.backend();
    assert_eq!(storage.metric_count().unwrap(), 2);
    let (_, loss) = storage.metric_series(&id, "training.loss").unwrap().unwrap();
    assert_eq!(loss.steps, [10, 20, 30, 40, 50, 60]);
    assert_eq!(loss.values, [1.0, 2.0, 3.0, 10.0, 20.0, 30.0]);
    let doc = storage.load_run(&id).unwrap().unwrap();
    assert_eq!(doc["info"]["metrics"].as_array().unwrap().len(), 2);
    assert_eq!(doc["info"]["nr"], 7);

    // A second run gets series of its own.
    let other = recorder
        .started_event(&descriptor(), runlog::timestamp(), None)
        .unwrap();
    recorder.log_metrics(&linearize_metrics(&metrics)).unwrap();
    let storage = recorder.backend();
    assert_eq!(storage.run_count().unwrap(), 2);
    assert_eq!(storage.metric_count().unwrap(), 4);
    let (_, loss) = storage.metric_series(&other, "training.loss").unwrap().unwrap();
    assert_eq!(loss.steps, [10, 20, 30, 40, 50, 60]);
}
