//! Pipeline runs across several operators.

mod common;

use common::builders::{OperatorBuilder, VolumeBuilder};
use common::{assert_float_eq, fresh_interpreter, test_timeout, RecordingSink};
use tomo_operators::config::PipelineSettings;
use tomo_operators::{PipelineEvent, PipelineRunner};

#[test]
fn test_each_operator_receives_its_own_results() {
    let interp = fresh_interpreter();
    let mut normalize = OperatorBuilder::new("Normalize")
        .interpreter(interp.clone())
        .script(tomo_operators::scripting::builtins::NORMALIZE)
        .build();
    let mut stats = OperatorBuilder::new("Stats")
        .interpreter(interp.clone())
        .descriptor(r#"{"results": [{"name": "summary", "label": "Summary"}]}"#)
        .script(
            r#"
fn transform_scalars(dataset) {
    let t = new_table(["min", "max", "mean"]);
    t.add_row([dataset.min(), dataset.max(), dataset.mean()]);
    #{ summary: t }
}
"#,
        )
        .build();

    let input = VolumeBuilder::new([3, 1, 1]).values(vec![10.0, 20.0, 30.0]).build();
    let summary = PipelineRunner::default()
        .run(vec![normalize.transformer(), stats.transformer()], input)
        .unwrap()
        .wait()
        .unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.completed, 2);

    let mut sink = RecordingSink::new();
    assert_eq!(normalize.process_deliveries(&mut sink).unwrap(), 0);
    assert_eq!(stats.process_deliveries(&mut sink).unwrap(), 1);

    let data = stats.result("summary").unwrap().data().unwrap().clone();
    let guard = data.read();
    let row = &guard.as_table().unwrap().rows()[0];
    assert_float_eq(row[0], 0.0, 1e-12);
    assert_float_eq(row[1], 1.0, 1e-12);
    assert_float_eq(row[2], 0.5, 1e-12);
}

#[test]
fn test_cancel_does_not_interrupt_non_cancelable_stage() {
    let interp = fresh_interpreter();
    let slow = OperatorBuilder::new("Slow")
        .interpreter(interp.clone())
        .script(
            r#"
fn transform_scalars(dataset) {
    set_progress(1);
    let n = 0;
    while n < 1000000 { n += 1; }
    dataset.fill(7.0);
}
"#,
        )
        .build();
    let next = OperatorBuilder::new("Next")
        .interpreter(interp)
        .script("fn transform_scalars(dataset) { dataset.fill(0.0); }")
        .build();
    assert!(!slow.supports_cancel());

    let runner = PipelineRunner::new(PipelineSettings {
        progress_interval_ms: 1,
        ..PipelineSettings::default()
    });
    let handle = runner
        .run(
            vec![slow.transformer(), next.transformer()],
            VolumeBuilder::new([2, 1, 1]).build(),
        )
        .unwrap();

    loop {
        if let PipelineEvent::StageStarted { index: 0, .. } =
            handle.events().recv_timeout(test_timeout()).unwrap()
        {
            break;
        }
    }
    handle.cancel();
    assert!(!slow.context().is_cancel_requested());

    let summary = handle.wait().unwrap();
    assert!(summary.canceled);
    assert_eq!(summary.completed, 1);
    let guard = summary.output.read();
    assert_eq!(guard.as_image().unwrap().scalars(), &[7.0, 7.0]);
}

#[test]
fn test_failed_stage_reported() {
    let op = OperatorBuilder::new("Throws")
        .script("fn transform_scalars(dataset) { dataset.get(99) }")
        .build();
    let summary = PipelineRunner::default()
        .run(vec![op.transformer()], VolumeBuilder::new([1, 1, 1]).build())
        .unwrap()
        .wait()
        .unwrap();
    assert!(!summary.is_success());
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].to_string().contains("Throws"));
}
