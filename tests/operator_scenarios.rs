//! End-to-end operator behaviour: bind, invoke on a worker, deliver on the
//! owning thread.

mod common;

use common::builders::{OperatorBuilder, VolumeBuilder};
use common::{test_timeout, Attached, RecordingSink};
use crossbeam_channel::bounded;
use std::sync::Arc;
use tomo_operators::{ExecutionOutcome, OperatorError};

const HIST_DESCRIPTOR: &str = r#"{"label": "Hist", "results": [{"name": "hist", "label": "Histogram"}]}"#;

#[test]
fn test_identity_script_has_no_outputs() {
    let op = OperatorBuilder::new("Identity")
        .script("fn transform_scalars(dataset) { dataset }")
        .build();
    let input = VolumeBuilder::new([4, 4, 4]).ramp().build();

    match op.apply_transform(&input) {
        ExecutionOutcome::Success {
            results,
            child,
            extraction_errors,
        } => {
            assert!(results.is_empty());
            assert!(child.is_none());
            assert!(extraction_errors.is_empty());
        }
        ExecutionOutcome::Failure(e) => panic!("identity failed: {}", e),
    }
    assert_eq!(op.pending_deliveries(), 0);
}

#[test]
fn test_histogram_result_delivered_on_owning_thread() {
    let mut op = OperatorBuilder::new("Hist")
        .descriptor(HIST_DESCRIPTOR)
        .script("fn transform_scalars(dataset) { #{ hist: dataset.histogram(8) } }")
        .build();
    let input = VolumeBuilder::new([4, 4, 4]).ramp().build();

    let worker = op.transformer();
    let outcome = std::thread::spawn(move || worker.apply_transform(&input))
        .join()
        .unwrap();
    assert!(outcome.is_success());

    let mut sink = RecordingSink::new();
    assert_eq!(op.process_deliveries(&mut sink).unwrap(), 1);
    assert_eq!(sink.keys(), ["hist"]);

    let main = std::thread::current().id();
    assert!(sink.attached.iter().all(|a| a.thread() == main));
    match &sink.attached[0] {
        Attached::Result { data, .. } => {
            let guard = data.read();
            let table = guard.as_table().unwrap();
            assert_eq!(table.row_count(), 8);
            let total: f64 = table.column("count").unwrap().iter().sum();
            assert_eq!(total, 64.0);
        }
        other => panic!("expected a result, got {:?}", other),
    }
    assert!(op.result("hist").unwrap().data().is_some());
}

#[test]
fn test_missing_declared_result_reports_and_succeeds() {
    let mut op = OperatorBuilder::new("Hist")
        .descriptor(HIST_DESCRIPTOR)
        .script("fn transform_scalars(dataset) { #{} }")
        .build();
    let input = VolumeBuilder::new([2, 2, 2]).build();

    match op.apply_transform(&input) {
        ExecutionOutcome::Success {
            extraction_errors, ..
        } => {
            assert_eq!(extraction_errors.len(), 1);
            assert!(matches!(
                &extraction_errors[0],
                OperatorError::ResultExtraction { name, .. } if name == "hist"
            ));
        }
        ExecutionOutcome::Failure(e) => panic!("unexpected failure: {}", e),
    }

    let mut sink = RecordingSink::new();
    assert_eq!(op.process_deliveries(&mut sink).unwrap(), 0);
    assert!(sink.attached.is_empty());
}

#[test]
fn test_syntax_error_leaves_operator_unbound() {
    let mut op = OperatorBuilder::new("Broken").build();
    let input = VolumeBuilder::new([2, 2, 2]).build();

    // never-set script is a no-op success
    assert!(op.apply_transform(&input).is_success());

    let err = op
        .set_script("fn transform_scalars(dataset) { let x = ; }")
        .unwrap_err();
    assert!(matches!(err, OperatorError::Compile { .. }));
    assert!(!op.is_bound());
    assert!(!op.apply_transform(&input).is_success());

    // a later valid script recovers
    op.set_script("fn transform_scalars(dataset) { dataset }")
        .unwrap();
    assert!(op.apply_transform(&input).is_success());
}

#[test]
fn test_results_then_child_in_declared_order() {
    let mut op = OperatorBuilder::new("Multi")
        .descriptor(
            r#"{
                "results": [
                    {"name": "b", "label": "B"},
                    {"name": "a", "label": "A"}
                ],
                "children": [{"name": "mask", "label": "Mask"}]
            }"#,
        )
        .script(
            r#"
fn transform_scalars(dataset) {
    let t = new_table(["x"]);
    t.add_row([1.0]);
    #{ mask: dataset.threshold(0.0, 1.0), a: t, b: copy_table(t) }
}

fn copy_table(t) {
    let out = new_table(t.columns);
    for i in 0..t.row_count {
        out.add_row(t.row(i));
    }
    out
}
"#,
        )
        .build();
    let input = VolumeBuilder::new([2, 1, 1]).values(vec![0.5, 2.0]).build();

    assert!(op.apply_transform(&input).is_success());
    let mut sink = RecordingSink::new();
    assert_eq!(op.process_deliveries(&mut sink).unwrap(), 3);
    assert_eq!(sink.keys(), ["b", "a", "Mask"]);

    match &sink.attached[2] {
        Attached::Child { data, .. } => {
            let guard = data.read();
            assert_eq!(guard.as_image().unwrap().scalars(), &[1.0, 0.0]);
        }
        other => panic!("expected the child dataset, got {:?}", other),
    }
}

#[test]
fn test_deliveries_refused_off_owning_thread() {
    let mut op = OperatorBuilder::new("Hist")
        .descriptor(HIST_DESCRIPTOR)
        .script("fn transform_scalars(dataset) { #{ hist: dataset.histogram(2) } }")
        .build();
    let input = VolumeBuilder::new([2, 2, 2]).ramp().build();
    assert!(op.apply_transform(&input).is_success());

    let (mut op, refused) = std::thread::spawn(move || {
        let mut sink = RecordingSink::new();
        let result = op.process_deliveries(&mut sink);
        (op, result)
    })
    .join()
    .unwrap();
    assert!(matches!(refused, Err(OperatorError::WrongThread)));
    assert_eq!(op.pending_deliveries(), 1);

    let mut sink = RecordingSink::new();
    assert_eq!(op.process_deliveries(&mut sink).unwrap(), 1);
}

#[test]
fn test_waker_fires_after_worker_posts() {
    let mut op = OperatorBuilder::new("Hist")
        .descriptor(HIST_DESCRIPTOR)
        .script("fn transform_scalars(dataset) { #{ hist: dataset.histogram(2) } }")
        .build();
    let (wake_tx, wake_rx) = bounded::<()>(1);
    op.set_waker(Some(Arc::new(move || {
        let _ = wake_tx.try_send(());
    })));

    let worker = op.transformer();
    let input = VolumeBuilder::new([2, 2, 2]).ramp().build();
    std::thread::spawn(move || worker.apply_transform(&input));

    wake_rx.recv_timeout(test_timeout()).unwrap();
    let mut sink = RecordingSink::new();
    assert_eq!(op.process_deliveries(&mut sink).unwrap(), 1);
}

#[test]
fn test_descriptor_label_renames_operator() {
    let op = OperatorBuilder::new("Unnamed")
        .descriptor(HIST_DESCRIPTOR)
        .build();
    assert_eq!(op.label(), "Hist");
    assert_eq!(op.results().len(), 1);
    assert_eq!(op.results()[0].label(), Some("Histogram"));
}
