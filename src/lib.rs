//! # tomo-operators: script-backed operators for volumetric data
//!
//! The operator execution core of a tomographic dataset processing
//! application. A user writes a transform script in Rhai; the core binds
//! it once, applies it to volume buffers on worker threads, and hands any
//! secondary results and child datasets back to the operator's owning
//! thread in order.
//!
//! ## Architecture
//!
//! - **Data**: shared volume and table handles scripts operate on
//! - **Scripting**: the process-wide interpreter, its lock, and the bound
//!   script with its entry point and capability flags
//! - **Operator**: descriptor parsing, result demultiplexing, and the
//!   delivery bridge back to the owning thread
//! - **Pipeline**: worker-thread runner with cooperative cancellation
//!
//! ## Example
//!
//! ```no_run
//! use tomo_operators::{data::ImageData, DataHandle, Operator, PipelineSink};
//!
//! struct Tree;
//!
//! impl PipelineSink for Tree {
//!     fn attach_result(&mut self, name: &str, data: DataHandle) {
//!         println!("result {name}: {data}");
//!     }
//!     fn attach_child_dataset(&mut self, label: &str, data: DataHandle) {
//!         println!("child {label}: {data}");
//!     }
//! }
//!
//! let mut op = Operator::new("Histogram");
//! op.set_json_description(r#"{"results": [{"name": "hist", "label": "Histogram"}]}"#)?;
//! op.set_script("fn transform_scalars(d) { #{ hist: d.histogram(16) } }")?;
//!
//! let volume = DataHandle::from_image(ImageData::new([8, 8, 8])?);
//! let worker = op.transformer();
//! std::thread::spawn(move || worker.apply_transform(&volume)).join().unwrap();
//!
//! op.process_deliveries(&mut Tree)?;
//! # Ok::<(), tomo_operators::OperatorError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod operator;
pub mod pipeline;
pub mod scripting;

// Re-export commonly used types
pub use config::CoreConfig;
pub use data::{DataHandle, DataKind, DataObject};
pub use error::{OperatorError, Result};
pub use operator::{ExecutionOutcome, Operator, OperatorEvent, PipelineSink, Transformer};
pub use pipeline::{PipelineEvent, PipelineRunner, RunSummary};
pub use scripting::{CompiledScript, Interpreter};
