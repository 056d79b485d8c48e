//! Thread boundary between an operator's worker side and its owning thread.
//!
//! The worker posts immutable [`Delivery`] messages into an unbounded
//! channel and pokes the owning thread's run loop through an optional wake
//! callback. The owning thread drains the channel in post order and hands
//! each message to a [`PipelineSink`]. Posting never blocks.

use crate::data::DataHandle;
use crate::operator::descriptor::ResultSlotId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};

/// Messages sent from a worker to the operator's owning thread.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Data for a declared result slot.
    Result {
        /// Descriptor generation the slot id belongs to
        generation: u64,
        slot: ResultSlotId,
        name: String,
        data: DataHandle,
    },
    /// A child dataset to insert below the operator's dataset.
    ChildDataset { label: String, data: DataHandle },
}

/// Callback that schedules a drain on the owning thread.
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Receiving end of result hand-off on the owning thread.
///
/// Implemented by whatever owns the dataset tree. Always called on the
/// operator's owning thread.
#[cfg_attr(test, mockall::automock)]
pub trait PipelineSink {
    /// Attach a named secondary result
    fn attach_result(&mut self, name: &str, data: DataHandle);

    /// Insert a child dataset produced by the operator
    fn attach_child_dataset(&mut self, label: &str, data: DataHandle);
}

/// Worker-side posting handle. Cheap to clone.
#[derive(Clone)]
pub struct DeliverySender {
    tx: Sender<Delivery>,
    waker: Arc<RwLock<Option<Waker>>>,
}

impl DeliverySender {
    /// Queue a message. Returns false if the owning side is gone.
    pub fn post(&self, delivery: Delivery) -> bool {
        self.tx.send(delivery).is_ok()
    }

    /// Run the wake callback, if one is installed
    pub fn wake(&self) {
        let waker = self
            .waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }

    pub(crate) fn set_waker(&self, waker: Option<Waker>) {
        *self.waker.write().unwrap_or_else(PoisonError::into_inner) = waker;
    }
}

impl std::fmt::Debug for DeliverySender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverySender")
            .field("pending", &self.tx.len())
            .finish()
    }
}

/// Owning-side end of the channel.
#[derive(Debug)]
pub struct DeliveryReceiver {
    rx: Receiver<Delivery>,
}

impl DeliveryReceiver {
    /// Take the next queued message without blocking
    pub fn try_recv(&self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create a connected sender/receiver pair with no waker installed.
pub fn channel() -> (DeliverySender, DeliveryReceiver) {
    let (tx, rx) = unbounded();
    (
        DeliverySender {
            tx,
            waker: Arc::new(RwLock::new(None)),
        },
        DeliveryReceiver { rx },
    )
}
