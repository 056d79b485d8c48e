//! Script-backed operators and their result hand-off.
//!
//! # Architecture
//!
//! ```text
//! [Operator] ──transformer()──► [Transformer] (any thread)
//!     ▲                              │ invoke script, demultiplex
//!     │                              ▼
//!     └── process_deliveries() ◄── [delivery channel] ──► wake callback
//!             │
//!             ▼
//!       [PipelineSink] (owning thread)
//! ```

pub mod bridge;
pub mod demux;
pub mod descriptor;
pub mod persist;
pub mod result;
mod script_operator;

pub use bridge::{Delivery, DeliveryReceiver, DeliverySender, PipelineSink, Waker};
pub use demux::{demultiplex, Extracted, ScriptOutput};
pub use descriptor::{ChildDatasetSpec, OperatorDescriptor, ResultSlot, ResultSlotId};
pub use persist::AttributeNode;
pub use result::OperatorResult;
pub use script_operator::{
    ExecutionOutcome, Operator, OperatorEvent, Transformer, LABEL_ATTRIBUTE, SCRIPT_ATTRIBUTE,
};
