//! Pipeline runner: applies a sequence of operators on a worker thread.
//!
//! Each run gets its own thread. While a stage runs, a monitor thread polls
//! the stage's operator context and reports progress at the configured
//! interval.

use crate::config::PipelineSettings;
use crate::data::DataHandle;
use crate::operator::{ExecutionOutcome, Transformer};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::scripting::SharedOperatorContext;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Messages sent from the worker to whoever holds the [`RunHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StageStarted {
        index: usize,
        label: String,
    },
    Progress {
        index: usize,
        value: i64,
        maximum: i64,
    },
    StageFinished {
        index: usize,
        label: String,
        success: bool,
    },
    /// Run stopped early at a cancel request
    Canceled {
        completed: usize,
    },
    /// Run reached its end (possibly after failures)
    Finished {
        completed: usize,
    },
}

/// Final state of a run.
#[derive(Debug)]
pub struct RunSummary {
    /// Stages that returned success
    pub completed: usize,
    pub canceled: bool,
    pub failures: Vec<PipelineError>,
    /// The dataset the stages operated on
    pub output: DataHandle,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        !self.canceled && self.failures.is_empty()
    }
}

struct RunningStage {
    context: SharedOperatorContext,
    supports_cancel: bool,
}

#[derive(Default)]
struct RunState {
    canceled: AtomicBool,
    current: Mutex<Option<RunningStage>>,
}

impl RunState {
    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stage) = current.as_ref() {
            if stage.supports_cancel {
                stage.context.request_cancel();
            }
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn enter_stage(&self, stage: Option<RunningStage>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stage) = stage.as_ref() {
            if stage.supports_cancel && self.is_canceled() {
                stage.context.request_cancel();
            }
        }
        *current = stage;
    }
}

/// Handle to a run in progress.
pub struct RunHandle {
    state: Arc<RunState>,
    events: Receiver<PipelineEvent>,
    worker: Option<JoinHandle<RunSummary>>,
}

impl RunHandle {
    /// Request cooperative cancellation
    pub fn cancel(&self) {
        tracing::debug!("Pipeline cancel requested");
        self.state.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.state.is_canceled()
    }

    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Block until the worker exits
    pub fn wait(mut self) -> PipelineResult<RunSummary> {
        let worker = self.worker.take().ok_or(PipelineError::WorkerPanicked)?;
        worker.join().map_err(|_| PipelineError::WorkerPanicked)
    }
}

/// Runs operator sequences with shared settings.
#[derive(Debug, Clone, Default)]
pub struct PipelineRunner {
    settings: PipelineSettings,
}

impl PipelineRunner {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Start applying `stages` to `input` on a new worker thread.
    pub fn run(&self, stages: Vec<Transformer>, input: DataHandle) -> PipelineResult<RunHandle> {
        if stages.is_empty() {
            return Err(PipelineError::Empty);
        }

        let state = Arc::new(RunState::default());
        let (events_tx, events_rx) = unbounded();
        let worker = Worker {
            stages,
            input,
            settings: self.settings.clone(),
            state: state.clone(),
            events: events_tx,
        };

        let handle = std::thread::Builder::new()
            .name("tomo-pipeline".to_string())
            .spawn(move || worker.run())
            .map_err(PipelineError::Spawn)?;

        Ok(RunHandle {
            state,
            events: events_rx,
            worker: Some(handle),
        })
    }
}

struct Worker {
    stages: Vec<Transformer>,
    input: DataHandle,
    settings: PipelineSettings,
    state: Arc<RunState>,
    events: Sender<PipelineEvent>,
}

impl Worker {
    fn run(self) -> RunSummary {
        tracing::info!("Pipeline thread started ({} stages)", self.stages.len());

        let mut summary = RunSummary {
            completed: 0,
            canceled: false,
            failures: Vec::new(),
            output: self.input.clone(),
        };

        for (index, stage) in self.stages.iter().enumerate() {
            if self.state.is_canceled() {
                summary.canceled = true;
                break;
            }

            stage.context().reset();
            self.state.enter_stage(Some(RunningStage {
                context: stage.context().clone(),
                supports_cancel: stage.supports_cancel(),
            }));
            self.send(PipelineEvent::StageStarted {
                index,
                label: stage.label().to_string(),
            });

            let outcome = self.run_stage(index, stage);
            self.state.enter_stage(None);

            let success = outcome.is_success();
            self.send(PipelineEvent::StageFinished {
                index,
                label: stage.label().to_string(),
                success,
            });

            match outcome {
                ExecutionOutcome::Success { .. } => summary.completed += 1,
                ExecutionOutcome::Failure(message) => {
                    summary.failures.push(PipelineError::Stage {
                        index,
                        label: stage.label().to_string(),
                        message,
                    });
                    if self.settings.stop_on_failure {
                        tracing::warn!("Stopping pipeline after failed stage {}", index);
                        break;
                    }
                }
            }
        }

        // a cancel that arrived during the last stage still counts
        if !summary.canceled && self.state.is_canceled() && summary.completed < self.stages.len()
        {
            summary.canceled = true;
        }

        if summary.canceled {
            self.send(PipelineEvent::Canceled {
                completed: summary.completed,
            });
        } else {
            self.send(PipelineEvent::Finished {
                completed: summary.completed,
            });
        }

        tracing::info!("Pipeline thread exiting");
        summary
    }

    fn run_stage(&self, index: usize, stage: &Transformer) -> ExecutionOutcome {
        let interval = Duration::from_millis(self.settings.progress_interval_ms.max(1));
        let context = stage.context().clone();
        let events = self.events.clone();

        std::thread::scope(|scope| {
            let (done_tx, done_rx) = bounded::<()>(0);
            scope.spawn(move || loop {
                select! {
                    recv(done_rx) -> _ => break,
                    default(interval) => {
                        let _ = events.send(PipelineEvent::Progress {
                            index,
                            value: context.progress(),
                            maximum: context.progress_maximum(),
                        });
                    }
                }
            });

            let outcome = stage.apply_transform(&self.input);
            drop(done_tx);
            outcome
        })
    }

    fn send(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpreterLimits;
    use crate::data::ImageData;
    use crate::operator::Operator;
    use crate::scripting::{builtins, Interpreter};

    const WAIT: Duration = Duration::from_secs(10);

    fn interpreter() -> Arc<Interpreter> {
        Arc::new(Interpreter::new(&InterpreterLimits::default()))
    }

    fn operator(interp: &Arc<Interpreter>, label: &str, script: &str) -> Operator {
        let mut op = Operator::with_interpreter(label, interp.clone());
        op.set_script(script).unwrap();
        op
    }

    fn volume() -> DataHandle {
        DataHandle::from_image(
            ImageData::from_scalars([2, 1, 1], vec![1.0, 3.0]).unwrap(),
        )
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let runner = PipelineRunner::default();
        assert!(matches!(
            runner.run(Vec::new(), volume()),
            Err(PipelineError::Empty)
        ));
    }

    #[test]
    fn test_stages_run_in_order() {
        let interp = interpreter();
        let double = operator(&interp, "Double", "fn transform_scalars(d) { d.scale(2.0); }");
        let shift = operator(&interp, "Shift", "fn transform_scalars(d) { d.offset(1.0); }");

        let runner = PipelineRunner::default();
        let handle = runner
            .run(vec![double.transformer(), shift.transformer()], volume())
            .unwrap();
        let summary = handle.wait().unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.completed, 2);
        let values = summary.output.read().as_image().unwrap().scalars().to_vec();
        assert_eq!(values, vec![3.0, 7.0]);
    }

    #[test]
    fn test_stop_on_failure() {
        let interp = interpreter();
        let bad = operator(&interp, "Bad", "fn transform_scalars(d) { throw \"nope\"; }");
        let good = operator(&interp, "Good", builtins::IDENTITY);

        let runner = PipelineRunner::default();
        let summary = runner
            .run(vec![bad.transformer(), good.transformer()], volume())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failures.len(), 1);

        let runner = PipelineRunner::new(PipelineSettings {
            stop_on_failure: false,
            ..PipelineSettings::default()
        });
        let summary = runner
            .run(vec![bad.transformer(), good.transformer()], volume())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(summary.completed, 1);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_cancel_stops_before_next_stage() {
        let interp = interpreter();
        let spin = operator(
            &interp,
            "Spin",
            r#"
fn is_cancelable() { true }
fn transform_scalars(d) {
    set_progress_maximum(10);
    set_progress(5);
    while !cancel_requested() { }
}
"#,
        );
        let after = operator(&interp, "After", "fn transform_scalars(d) { d.fill(0.0); }");

        let runner = PipelineRunner::new(PipelineSettings {
            progress_interval_ms: 5,
            ..PipelineSettings::default()
        });
        let handle = runner
            .run(vec![spin.transformer(), after.transformer()], volume())
            .unwrap();

        loop {
            match handle.events().recv_timeout(WAIT).unwrap() {
                PipelineEvent::Progress {
                    index: 0,
                    value: 5,
                    maximum,
                } => {
                    assert_eq!(maximum, 10);
                    break;
                }
                _ => continue,
            }
        }
        handle.cancel();

        let summary = handle.wait().unwrap();
        assert!(summary.canceled);
        assert_eq!(summary.completed, 1);
        let values = summary.output.read().as_image().unwrap().scalars().to_vec();
        assert_eq!(values, vec![1.0, 3.0]);
    }

    #[test]
    fn test_events_sequence() {
        let interp = interpreter();
        let op = operator(&interp, "Only", builtins::IDENTITY);
        let handle = PipelineRunner::default()
            .run(vec![op.transformer()], volume())
            .unwrap();

        let mut events = Vec::new();
        loop {
            let event = handle.events().recv_timeout(WAIT).unwrap();
            let done = matches!(event, PipelineEvent::Finished { .. });
            if !matches!(event, PipelineEvent::Progress { .. }) {
                events.push(event);
            }
            if done {
                break;
            }
        }
        assert_eq!(
            events,
            vec![
                PipelineEvent::StageStarted {
                    index: 0,
                    label: "Only".into()
                },
                PipelineEvent::StageFinished {
                    index: 0,
                    label: "Only".into(),
                    success: true
                },
                PipelineEvent::Finished { completed: 1 },
            ]
        );
        assert!(handle.wait().unwrap().is_success());
    }
}
