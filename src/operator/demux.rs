//! Splits a script's return value into declared results and a child
//! dataset.
//!
//! Only an object map is inspected. Any other return value (unit, the
//! input dataset, a number) means "no secondary outputs". Each declared
//! name is looked up independently, so one bad entry never hides the rest.

use crate::data::DataHandle;
use crate::error::OperatorError;
use crate::operator::descriptor::{OperatorDescriptor, ResultSlotId};
use rhai::{Dynamic, Map};

/// What a script returned, as far as output extraction is concerned.
#[derive(Debug, Clone)]
pub enum ScriptOutput {
    /// Anything other than an object map
    Unstructured,
    /// An object map keyed by declared output names
    Mapping(Map),
}

impl From<&Dynamic> for ScriptOutput {
    fn from(value: &Dynamic) -> Self {
        match value.clone().try_cast::<Map>() {
            Some(map) => ScriptOutput::Mapping(map),
            None => ScriptOutput::Unstructured,
        }
    }
}

/// Outputs recovered from one invocation, in discovery order.
#[derive(Debug, Default)]
pub struct Extracted {
    pub results: Vec<(ResultSlotId, String, DataHandle)>,
    pub child: Option<(String, DataHandle)>,
    pub errors: Vec<OperatorError>,
}

impl Extracted {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.child.is_none()
    }
}

pub fn demultiplex(descriptor: &OperatorDescriptor, returned: &Dynamic) -> Extracted {
    let mut extracted = Extracted::default();
    let ScriptOutput::Mapping(map) = ScriptOutput::from(returned) else {
        return extracted;
    };

    for (slot, name) in descriptor.named_slots() {
        match lookup(&map, name) {
            Ok(data) => extracted.results.push((slot, name.to_string(), data)),
            Err(e) => extracted.errors.push(e),
        }
    }

    if let Some(child) = descriptor.child() {
        match lookup(&map, &child.name) {
            Ok(data) => extracted.child = Some((child.label.clone(), data)),
            Err(e) => extracted.errors.push(e),
        }
    }

    if !extracted.errors.is_empty() {
        let details: Vec<String> = extracted.errors.iter().map(|e| e.to_string()).collect();
        tracing::error!(
            "Could not extract all outputs from returned map {}: {}",
            returned,
            details.join("; ")
        );
    }

    extracted
}

fn lookup(map: &Map, name: &str) -> Result<DataHandle, OperatorError> {
    let value = map.get(name).ok_or_else(|| OperatorError::ResultExtraction {
        name: name.to_string(),
        message: format!("no result named '{}' in output", name),
    })?;
    value
        .clone()
        .try_cast::<DataHandle>()
        .ok_or_else(|| OperatorError::ResultExtraction {
            name: name.to_string(),
            message: format!("is not a data object (found {})", value.type_name()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ImageData, Table};

    fn descriptor() -> OperatorDescriptor {
        OperatorDescriptor::parse(
            r#"{
                "results": [{"name": "hist", "label": "H"}, {"name": "stats", "label": "S"}],
                "children": [{"name": "mask", "label": "Mask"}]
            }"#,
        )
        .unwrap()
    }

    fn table() -> DataHandle {
        DataHandle::from_table(Table::new(vec!["value".into()]))
    }

    #[test]
    fn test_non_map_yields_nothing() {
        let d = descriptor();
        for value in [
            Dynamic::UNIT,
            Dynamic::from(3_i64),
            Dynamic::from(table()),
        ] {
            let out = demultiplex(&d, &value);
            assert!(out.is_empty());
            assert!(out.errors.is_empty());
        }
    }

    #[test]
    fn test_all_present() {
        let d = descriptor();
        let hist = table();
        let mask = DataHandle::from_image(ImageData::new([1, 1, 1]).unwrap());
        let mut map = Map::new();
        map.insert("hist".into(), Dynamic::from(hist.clone()));
        map.insert("stats".into(), Dynamic::from(table()));
        map.insert("mask".into(), Dynamic::from(mask.clone()));
        map.insert("extra".into(), Dynamic::from(1_i64));

        let out = demultiplex(&d, &Dynamic::from_map(map));
        assert!(out.errors.is_empty());
        assert_eq!(out.results.len(), 2);
        assert_eq!(out.results[0].0, ResultSlotId(0));
        assert_eq!(out.results[0].1, "hist");
        assert!(out.results[0].2.ptr_eq(&hist));
        let (label, data) = out.child.unwrap();
        assert_eq!(label, "Mask");
        assert!(data.ptr_eq(&mask));
    }

    #[test]
    fn test_each_bad_entry_reported() {
        let d = descriptor();
        let mut map = Map::new();
        map.insert("stats".into(), Dynamic::from("not data".to_string()));
        map.insert("mask".into(), Dynamic::from(table()));

        let out = demultiplex(&d, &Dynamic::from_map(map));
        assert_eq!(out.errors.len(), 2);
        assert!(out.results.is_empty());
        assert!(out.child.is_some());
        assert!(matches!(
            &out.errors[0],
            OperatorError::ResultExtraction { name, .. } if name == "hist"
        ));
        assert!(out.errors[1].to_string().contains("is not a data object"));
    }
}
