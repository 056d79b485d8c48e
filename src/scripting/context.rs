//! Per-operator state reachable from inside a running script.
//!
//! Script-callable functions such as `set_progress()` or `cancel_requested()`
//! are registered once on the shared interpreter, so they need a way back to
//! whichever operator is currently executing. Before each invocation the
//! invoker enters an [`ActiveContext`] guard that installs the operator's
//! [`OperatorContext`] for the current thread; the registered functions look
//! it up through [`with_active`]. The script never holds the context itself.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Progress and cancellation state shared between an operator, its worker
/// side and the pipeline scheduler.
#[derive(Debug, Default)]
pub struct OperatorContext {
    cancel_requested: AtomicBool,
    progress: AtomicI64,
    progress_maximum: AtomicI64,
}

impl OperatorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Reset per-run state before a new invocation.
    pub fn reset(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.progress.store(0, Ordering::Relaxed);
        self.progress_maximum.store(0, Ordering::Relaxed);
    }

    pub fn set_progress(&self, value: i64) {
        self.progress.store(value, Ordering::Relaxed);
    }

    pub fn progress(&self) -> i64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn set_progress_maximum(&self, value: i64) {
        self.progress_maximum.store(value, Ordering::Relaxed);
    }

    pub fn progress_maximum(&self) -> i64 {
        self.progress_maximum.load(Ordering::Relaxed)
    }
}

/// Thread-safe shared operator context
pub type SharedOperatorContext = Arc<OperatorContext>;

thread_local! {
    static ACTIVE: RefCell<Option<SharedOperatorContext>> = const { RefCell::new(None) };
}

/// Scoped installation of an operator context for the current thread.
///
/// Restores whatever was active before when dropped, so nested entries
/// (an operator script driving another operator) unwind correctly.
pub struct ActiveContext {
    previous: Option<SharedOperatorContext>,
}

impl ActiveContext {
    pub fn enter(context: SharedOperatorContext) -> Self {
        let previous = ACTIVE.with(|slot| slot.borrow_mut().replace(context));
        Self { previous }
    }
}

impl Drop for ActiveContext {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Run `f` against the active context, if any.
pub fn with_active<R>(f: impl FnOnce(&OperatorContext) -> R) -> Option<R> {
    ACTIVE.with(|slot| slot.borrow().as_deref().map(f))
}
