//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use tomo_operators::config::InterpreterLimits;
use tomo_operators::{DataHandle, Interpreter, PipelineSink};

/// Upper bound for waiting on worker threads
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// A private interpreter so tests do not contend on the shared one
pub fn fresh_interpreter() -> Arc<Interpreter> {
    Arc::new(Interpreter::new(&InterpreterLimits::default()))
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// One call received by [`RecordingSink`]
#[derive(Debug, Clone)]
pub enum Attached {
    Result {
        name: String,
        data: DataHandle,
        thread: ThreadId,
    },
    Child {
        label: String,
        data: DataHandle,
        thread: ThreadId,
    },
}

impl Attached {
    pub fn key(&self) -> &str {
        match self {
            Attached::Result { name, .. } => name,
            Attached::Child { label, .. } => label,
        }
    }

    pub fn thread(&self) -> ThreadId {
        match self {
            Attached::Result { thread, .. } | Attached::Child { thread, .. } => *thread,
        }
    }
}

/// Sink that records every attachment with the thread it arrived on
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub attached: Vec<Attached>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.attached.iter().map(Attached::key).collect()
    }
}

impl PipelineSink for RecordingSink {
    fn attach_result(&mut self, name: &str, data: DataHandle) {
        self.attached.push(Attached::Result {
            name: name.to_string(),
            data,
            thread: std::thread::current().id(),
        });
    }

    fn attach_child_dataset(&mut self, label: &str, data: DataHandle) {
        self.attached.push(Attached::Child {
            label: label.to_string(),
            data,
            thread: std::thread::current().id(),
        });
    }
}
