//! Test data builders for creating test objects

use std::sync::Arc;
use tomo_operators::data::ImageData;
use tomo_operators::{DataHandle, Interpreter, Operator};

/// Builder for test volumes
pub struct VolumeBuilder {
    dims: [usize; 3],
    values: Option<Vec<f64>>,
}

impl VolumeBuilder {
    pub fn new(dims: [usize; 3]) -> Self {
        Self { dims, values: None }
    }

    /// Values 0, 1, 2, ... in storage order
    pub fn ramp(mut self) -> Self {
        let len = self.dims.iter().product::<usize>();
        self.values = Some((0..len).map(|i| i as f64).collect());
        self
    }

    pub fn values(mut self, values: Vec<f64>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn build(self) -> DataHandle {
        let image = match self.values {
            Some(values) => ImageData::from_scalars(self.dims, values).unwrap(),
            None => ImageData::new(self.dims).unwrap(),
        };
        DataHandle::from_image(image)
    }
}

/// Builder for script operators
pub struct OperatorBuilder {
    label: String,
    script: Option<String>,
    descriptor: Option<String>,
    interpreter: Option<Arc<Interpreter>>,
}

impl OperatorBuilder {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            script: None,
            descriptor: None,
            interpreter: None,
        }
    }

    pub fn script(mut self, script: &str) -> Self {
        self.script = Some(script.to_string());
        self
    }

    pub fn descriptor(mut self, descriptor: &str) -> Self {
        self.descriptor = Some(descriptor.to_string());
        self
    }

    pub fn interpreter(mut self, interpreter: Arc<Interpreter>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    /// Build, panicking if the descriptor or script is rejected
    pub fn build(self) -> Operator {
        let interpreter = self.interpreter.unwrap_or_else(super::fresh_interpreter);
        let mut op = Operator::with_interpreter(self.label, interpreter);
        if let Some(descriptor) = self.descriptor {
            op.set_json_description(descriptor).unwrap();
        }
        if let Some(script) = self.script {
            op.set_script(script).unwrap();
        }
        op
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_builder() {
        let v = VolumeBuilder::new([2, 2, 1]).ramp().build();
        let guard = v.read();
        assert_eq!(guard.as_image().unwrap().scalars(), &[0.0, 1.0, 2.0, 3.0]);
    }
}
