//! Result slots held by an operator on its owning thread.

use crate::data::DataHandle;
use crate::operator::descriptor::ResultSlot;

/// A declared result and the data most recently delivered to it.
#[derive(Debug, Clone, Default)]
pub struct OperatorResult {
    name: Option<String>,
    label: Option<String>,
    data: Option<DataHandle>,
}

impl OperatorResult {
    pub fn from_slot(slot: &ResultSlot) -> Self {
        Self {
            name: slot.name.clone(),
            label: slot.label.clone(),
            data: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn data(&self) -> Option<&DataHandle> {
        self.data.as_ref()
    }

    pub(crate) fn set_data(&mut self, data: DataHandle) {
        self.data = Some(data);
    }
}
