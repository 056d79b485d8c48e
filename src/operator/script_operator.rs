//! Script-backed operator.
//!
//! An [`Operator`] lives on its owning thread (normally the UI thread). It
//! owns the script text, the descriptor, the bound script and the result
//! slots. Work is done by a [`Transformer`], a `Send` snapshot of the bound
//! state that can run on any thread and reports back through the delivery
//! bridge. Only [`Operator::process_deliveries`] applies results, and only
//! on the owning thread.

use crate::data::DataHandle;
use crate::error::{OperatorError, Result};
use crate::operator::bridge::{self, Delivery, DeliveryReceiver, DeliverySender, PipelineSink, Waker};
use crate::operator::demux::demultiplex;
use crate::operator::descriptor::{OperatorDescriptor, ResultSlotId};
use crate::operator::persist::AttributeNode;
use crate::operator::result::OperatorResult;
use crate::scripting::{CompiledScript, Interpreter, OperatorContext, SharedOperatorContext};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::ThreadId;

/// Persisted attribute holding the label
pub const LABEL_ATTRIBUTE: &str = "label";

/// Persisted attribute holding the script text
pub const SCRIPT_ATTRIBUTE: &str = "script";

/// Change notifications emitted by an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorEvent {
    LabelModified(String),
    TransformModified,
    DescriptorModified,
}

/// Result of one invocation.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Success {
        results: Vec<(ResultSlotId, String, DataHandle)>,
        child: Option<(String, DataHandle)>,
        extraction_errors: Vec<OperatorError>,
    },
    Failure(String),
}

impl ExecutionOutcome {
    fn identity() -> Self {
        ExecutionOutcome::Success {
            results: Vec::new(),
            child: None,
            extraction_errors: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }
}

/// Worker-side half of an operator.
///
/// Holds shared snapshots of the bound script and descriptor taken when it
/// was created; later changes to the operator do not affect it. Results
/// posted for a descriptor that has since been replaced are dropped on the
/// owning side.
#[derive(Clone)]
pub struct Transformer {
    label: String,
    has_script: bool,
    compiled: Option<Arc<CompiledScript>>,
    descriptor: Arc<OperatorDescriptor>,
    interpreter: Arc<Interpreter>,
    context: SharedOperatorContext,
    sender: DeliverySender,
}

impl Transformer {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn supports_cancel(&self) -> bool {
        self.compiled
            .as_ref()
            .is_some_and(|c| c.supports_cancel())
    }

    pub fn context(&self) -> &SharedOperatorContext {
        &self.context
    }

    /// Run the bound script over `data` and post its outputs to the bridge.
    ///
    /// Progress and cancel state are left as they are; the caller resets
    /// the context before a run.
    pub fn apply_transform(&self, data: &DataHandle) -> ExecutionOutcome {
        if !self.has_script {
            return ExecutionOutcome::identity();
        }
        let Some(compiled) = &self.compiled else {
            let err = OperatorError::NoTransform(self.label.clone());
            tracing::error!("{}", err);
            return ExecutionOutcome::Failure(err.to_string());
        };

        let returned = match compiled.invoke(&self.interpreter, &self.context, data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("{}", e);
                return ExecutionOutcome::Failure(e.to_string());
            }
        };

        let extracted = demultiplex(&self.descriptor, &returned);
        if extracted.is_empty() {
            return ExecutionOutcome::Success {
                results: Vec::new(),
                child: None,
                extraction_errors: extracted.errors,
            };
        }

        let generation = self.descriptor.generation();
        for (slot, name, data) in &extracted.results {
            self.post(Delivery::Result {
                generation,
                slot: *slot,
                name: name.clone(),
                data: data.clone(),
            });
        }
        if let Some((label, data)) = &extracted.child {
            self.post(Delivery::ChildDataset {
                label: label.clone(),
                data: data.clone(),
            });
        }
        self.sender.wake();

        ExecutionOutcome::Success {
            results: extracted.results,
            child: extracted.child,
            extraction_errors: extracted.errors,
        }
    }

    fn post(&self, delivery: Delivery) {
        if !self.sender.post(delivery) {
            tracing::warn!("Operator '{}' is gone, dropping its output", self.label);
        }
    }
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer")
            .field("label", &self.label)
            .field("compiled", &self.compiled)
            .field("generation", &self.descriptor.generation())
            .finish()
    }
}

/// An operator whose transform is a user script.
pub struct Operator {
    label: String,
    script: String,
    json_description: String,
    descriptor: Arc<OperatorDescriptor>,
    compiled: Option<Arc<CompiledScript>>,
    results: Vec<OperatorResult>,
    supports_cancel: bool,
    revision: u64,
    interpreter: Arc<Interpreter>,
    context: SharedOperatorContext,
    sender: DeliverySender,
    receiver: DeliveryReceiver,
    owner: ThreadId,
    subscribers: Vec<Sender<OperatorEvent>>,
}

impl Operator {
    /// Create an operator on the current thread using the shared interpreter
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_interpreter(label, Interpreter::global())
    }

    pub fn with_interpreter(label: impl Into<String>, interpreter: Arc<Interpreter>) -> Self {
        let (sender, receiver) = bridge::channel();
        Self {
            label: label.into(),
            script: String::new(),
            json_description: String::new(),
            descriptor: Arc::new(OperatorDescriptor::empty()),
            compiled: None,
            results: Vec::new(),
            supports_cancel: false,
            revision: 0,
            interpreter,
            context: Arc::new(OperatorContext::new()),
            sender,
            receiver,
            owner: std::thread::current().id(),
            subscribers: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Rename the operator. Setting the current label again is not announced.
    pub fn set_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if label != self.label {
            self.label = label;
            self.emit(OperatorEvent::LabelModified(self.label.clone()));
        }
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// Replace the script text and rebind.
    ///
    /// Setting the text already installed does nothing. On a compile or
    /// binding failure the error is logged and returned, the text is kept
    /// and the operator is left without a transform.
    pub fn set_script(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if text == self.script {
            return Ok(());
        }

        self.script = text;
        self.compiled = None;
        self.revision += 1;

        if self.script.is_empty() {
            self.emit(OperatorEvent::TransformModified);
            return Ok(());
        }

        match CompiledScript::compile(&self.interpreter, &self.label, &self.script) {
            Ok(compiled) => {
                self.supports_cancel = compiled.supports_cancel();
                self.compiled = Some(Arc::new(compiled));
                self.emit(OperatorEvent::TransformModified);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to bind script for '{}': {}", self.label, e);
                Err(e)
            }
        }
    }

    /// Installed descriptor text, or "" if none was installed
    pub fn json_description(&self) -> &str {
        &self.json_description
    }

    /// Parse and install a descriptor.
    ///
    /// Identical text is a no-op. A parse failure is logged and returned
    /// and the previous descriptor stays in effect.
    pub fn set_json_description(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if text == self.json_description {
            return Ok(());
        }

        let descriptor = match OperatorDescriptor::parse(&text) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Invalid operator description for '{}': {}", self.label, e);
                return Err(e);
            }
        };

        self.results = descriptor
            .results()
            .iter()
            .map(OperatorResult::from_slot)
            .collect();
        // a descriptor label is announced even when it matches the current one
        if let Some(label) = descriptor.label() {
            self.label = label.to_string();
            self.emit(OperatorEvent::LabelModified(self.label.clone()));
        }
        self.descriptor = Arc::new(descriptor);
        self.json_description = text;
        self.emit(OperatorEvent::DescriptorModified);
        Ok(())
    }

    pub fn descriptor(&self) -> &OperatorDescriptor {
        &self.descriptor
    }

    pub fn results(&self) -> &[OperatorResult] {
        &self.results
    }

    pub fn result(&self, name: &str) -> Option<&OperatorResult> {
        self.results.iter().find(|r| r.name() == Some(name))
    }

    /// Whether the script reported it can stop early. Keeps its last
    /// successfully bound value when a later bind fails.
    pub fn supports_cancel(&self) -> bool {
        self.supports_cancel
    }

    /// Whether a transform is currently bound
    pub fn is_bound(&self) -> bool {
        self.compiled.is_some()
    }

    /// Number of compile attempts so far
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn context(&self) -> &SharedOperatorContext {
        &self.context
    }

    /// Request cancellation of a running invocation, if the script supports it
    pub fn cancel_transform(&self) {
        if self.supports_cancel {
            self.context.request_cancel();
        }
    }

    /// Snapshot the bound state for execution on another thread
    pub fn transformer(&self) -> Transformer {
        Transformer {
            label: self.label.clone(),
            has_script: !self.script.is_empty(),
            compiled: self.compiled.clone(),
            descriptor: self.descriptor.clone(),
            interpreter: self.interpreter.clone(),
            context: self.context.clone(),
            sender: self.sender.clone(),
        }
    }

    /// Run the transform synchronously. Outputs still go through the bridge.
    pub fn apply_transform(&self, data: &DataHandle) -> ExecutionOutcome {
        self.context.reset();
        self.transformer().apply_transform(data)
    }

    /// Install the callback run after a worker posts deliveries
    pub fn set_waker(&self, waker: Option<Waker>) {
        self.sender.set_waker(waker);
    }

    pub fn pending_deliveries(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_owning_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    /// Apply queued deliveries in post order. Returns how many reached the
    /// sink. Refused off the owning thread, leaving the queue untouched.
    pub fn process_deliveries(&mut self, sink: &mut dyn PipelineSink) -> Result<usize> {
        if !self.is_owning_thread() {
            return Err(OperatorError::WrongThread);
        }

        let mut applied = 0;
        while let Some(delivery) = self.receiver.try_recv() {
            match delivery {
                Delivery::Result {
                    generation,
                    slot,
                    name,
                    data,
                } => {
                    let current = self.descriptor.generation();
                    match self.results.get_mut(slot.index()) {
                        Some(result) if generation == current => {
                            result.set_data(data.clone());
                            sink.attach_result(&name, data);
                            applied += 1;
                        }
                        _ => {
                            tracing::warn!(
                                "Could not set result '{}' on '{}': descriptor changed",
                                name,
                                self.label
                            );
                        }
                    }
                }
                Delivery::ChildDataset { label, data } => {
                    sink.attach_child_dataset(&label, data);
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }

    /// Subscribe to change notifications
    pub fn subscribe(&mut self) -> Receiver<OperatorEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: OperatorEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Persist label and script. The descriptor is not persisted.
    pub fn serialize(&self) -> AttributeNode {
        let mut node = AttributeNode::new();
        node.set_attribute(LABEL_ATTRIBUTE, self.label.as_str());
        node.set_attribute(SCRIPT_ATTRIBUTE, self.script.as_str());
        node
    }

    /// Restore label then script. Missing attributes read as empty.
    pub fn deserialize(&mut self, node: &AttributeNode) -> Result<()> {
        self.set_label(node.attribute_or_empty(LABEL_ATTRIBUTE));
        self.set_script(node.attribute_or_empty(SCRIPT_ATTRIBUTE))
    }

    /// A fresh operator with the same label, script and descriptor, owned
    /// by the calling thread.
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::with_interpreter(self.label.clone(), self.interpreter.clone());
        // failures are logged by the setters
        let _ = copy.set_script(self.script.clone());
        if !self.json_description.is_empty() {
            let _ = copy.set_json_description(self.json_description.clone());
        }
        copy
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("label", &self.label)
            .field("bound", &self.compiled.is_some())
            .field("supports_cancel", &self.supports_cancel)
            .field("revision", &self.revision)
            .field("results", &self.results.len())
            .finish()
    }
}
