//! Sequential operator pipeline running on a worker thread.
//!
//! A run takes a list of [`Transformer`](crate::operator::Transformer)s and
//! one input dataset and applies each stage in order on a dedicated thread.
//! Results reach their operators through each operator's delivery bridge;
//! the run itself reports [`PipelineEvent`]s over a crossbeam channel.
//!
//! # Cancellation
//!
//! Cancellation is cooperative. [`RunHandle::cancel`] marks the run
//! canceled, which stops it before the next stage starts, and forwards the
//! request to the running stage only if that stage's script declared it can
//! stop early. An in-flight script call is never interrupted.

pub mod error;
pub mod runner;

pub use error::{PipelineError, PipelineResult};
pub use runner::{PipelineEvent, PipelineRunner, RunHandle, RunSummary};
