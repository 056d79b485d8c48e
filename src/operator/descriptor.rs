//! Operator descriptor: the JSON schema of an operator's outputs.
//!
//! ```json
//! {
//!   "label": "Histogram",
//!   "results": [{ "name": "hist", "label": "Histogram" }],
//!   "children": [{ "name": "segmentation", "label": "Segmented Volume" }]
//! }
//! ```
//!
//! Every field is optional. Result slots are addressed inside the core by
//! [`ResultSlotId`], an index into the declared order, never by raw name.

use crate::error::{OperatorError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Index of a declared result slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResultSlotId(pub u32);

impl ResultSlotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ResultSlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultSlotId({})", self.0)
    }
}

/// One declared result. Either half may be missing; a slot without a name
/// is kept for display but never looked up in the returned map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultSlot {
    pub name: Option<String>,
    pub label: Option<String>,
}

/// The child dataset an operator may spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDatasetSpec {
    pub name: String,
    pub label: String,
}

#[derive(Deserialize)]
struct RawDescriptor {
    label: Option<String>,
    results: Option<Vec<RawEntry>>,
    children: Option<Vec<RawEntry>>,
}

#[derive(Deserialize)]
struct RawEntry {
    name: Option<String>,
    label: Option<String>,
}

/// Parsed descriptor. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperatorDescriptor {
    label: Option<String>,
    results: Vec<ResultSlot>,
    child: Option<ChildDatasetSpec>,
    generation: u64,
}

impl OperatorDescriptor {
    /// Descriptor in effect before any JSON was installed
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse descriptor JSON.
    ///
    /// Structural problems (invalid JSON, a non-object document, fields of
    /// the wrong type) fail the whole parse. Problems with individual
    /// entries are logged and tolerated.
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| OperatorError::DescriptorParse(format!("Failed to parse JSON: {}", e)))?;
        if !value.is_object() {
            return Err(OperatorError::DescriptorParse(
                "Descriptor must be a JSON object".to_string(),
            ));
        }
        let raw: RawDescriptor = serde_json::from_value(value)
            .map_err(|e| OperatorError::DescriptorParse(e.to_string()))?;

        let mut seen = HashSet::new();
        let results = raw
            .results
            .unwrap_or_default()
            .into_iter()
            .map(|entry| {
                let name = match entry.name {
                    Some(name) if !seen.insert(name.clone()) => {
                        tracing::error!(
                            "Duplicate result name '{}' in operator description, keeping the first",
                            name
                        );
                        None
                    }
                    other => other,
                };
                ResultSlot {
                    name,
                    label: entry.label,
                }
            })
            .collect();

        let child = match raw.children {
            None => None,
            Some(children) => {
                if children.len() != 1 {
                    tracing::warn!(
                        "Operator description lists {} child datasets, only one is supported",
                        children.len()
                    );
                }
                match children.into_iter().next() {
                    None => None,
                    Some(RawEntry {
                        name: Some(name),
                        label: Some(label),
                    }) => Some(ChildDatasetSpec { name, label }),
                    Some(_) => {
                        tracing::error!("No name or label given for child dataset");
                        None
                    }
                }
            }
        };

        Ok(Self {
            label: raw.label,
            results,
            child,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn results(&self) -> &[ResultSlot] {
        &self.results
    }

    pub fn child(&self) -> Option<&ChildDatasetSpec> {
        self.child.as_ref()
    }

    /// Identifies this installation; unique per process
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Named slots in declared order
    pub fn named_slots(&self) -> impl Iterator<Item = (ResultSlotId, &str)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.name.as_deref().map(|n| (ResultSlotId(i as u32), n)))
    }

    /// Look up a slot by its name
    pub fn slot_id(&self, name: &str) -> Option<ResultSlotId> {
        self.named_slots()
            .find(|(_, n)| *n == name)
            .map(|(id, _)| id)
    }
}
