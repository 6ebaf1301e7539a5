use std::sync::Mutex;

use tch::{CModule, Device, Kind, TchError, Tensor};

use super::preprocess::PreprocessedTensor;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Torch error: {0}")]
    Torch(#[from] TchError),
    #[error("Model lock poisoned")]
    Poisoned,
}

/// Anything that maps a preprocessed image to one score per label.
pub trait Classifier: Send + Sync {
    fn forward(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError>;

    fn describe(&self) -> String;
}

pub struct TorchScriptClassifier {
    module: Mutex<CModule>,
    device: Device,
    apply_softmax: bool,
}

impl TorchScriptClassifier {
    pub fn new(mut module: CModule, device: Device, apply_softmax: bool) -> Self {
        module.set_eval();
        Self {
            module: Mutex::new(module),
            device,
            apply_softmax,
        }
    }
}

fn input_tensor(input: &PreprocessedTensor, device: Device) -> Result<Tensor, TchError> {
    let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    Tensor::from_slice(&input.to_vec())
        .f_reshape(shape)?
        .f_to_device(device)
}

impl Classifier for TorchScriptClassifier {
    fn forward(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
        let tensor = input_tensor(input, self.device)?;
        let module = self.module.lock().map_err(|_| InferenceError::Poisoned)?;
        let output = tch::no_grad(|| module.forward_ts(&[tensor]))?;
        let output = if self.apply_softmax {
            output.f_softmax(-1, Kind::Float)?
        } else {
            output.f_to_kind(Kind::Float)?
        };
        let flat = output.f_to_device(Device::Cpu)?.f_view([-1i64])?;
        Ok(Vec::<f32>::try_from(&flat)?)
    }

    fn describe(&self) -> String {
        format!("TorchScript module on {:?}", self.device)
    }
}
