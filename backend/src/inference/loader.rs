use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tch::{CModule, Device};

use super::model::{Classifier, TorchScriptClassifier};

const MAX_ERROR_CHARS: usize = 300;

/// Where the model loader was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Uninitialized,
    Downloading,
    Deserializing,
    Loaded,
    Failed,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadStage::Uninitialized => "uninitialized",
            LoadStage::Downloading => "downloading",
            LoadStage::Deserializing => "deserializing",
            LoadStage::Loaded => "loaded",
            LoadStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadFailure {
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("Model load failed while {stage} {}: {message}", .path.display())]
pub struct LoadError {
    pub stage: LoadStage,
    pub path: PathBuf,
    pub message: String,
}

impl LoadError {
    pub fn new(stage: LoadStage, path: &Path, source: impl fmt::Display) -> Self {
        Self {
            stage,
            path: path.to_path_buf(),
            message: truncate(&source.to_string(), MAX_ERROR_CHARS),
        }
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// One way of turning an artifact on disk into a classifier.
pub trait ModelLoader: Send + Sync {
    fn name(&self) -> &'static str;

    fn load(&self, path: &Path) -> Result<Box<dyn Classifier>, LoadFailure>;
}

/// TorchScript module on the preferred device, in eval mode.
pub struct TorchScriptLoader {
    pub device: Device,
    pub apply_softmax: bool,
}

impl ModelLoader for TorchScriptLoader {
    fn name(&self) -> &'static str {
        "torchscript"
    }

    fn load(&self, path: &Path) -> Result<Box<dyn Classifier>, LoadFailure> {
        let module = CModule::load_on_device(path, self.device)?;
        Ok(Box::new(TorchScriptClassifier::new(module, self.device, self.apply_softmax)))
    }
}

/// Same artifact with every tensor mapped onto the CPU.
pub struct TorchScriptCpuLoader {
    pub apply_softmax: bool,
}

impl ModelLoader for TorchScriptCpuLoader {
    fn name(&self) -> &'static str {
        "torchscript-cpu"
    }

    fn load(&self, path: &Path) -> Result<Box<dyn Classifier>, LoadFailure> {
        let module = CModule::load_on_device(path, Device::Cpu)?;
        Ok(Box::new(TorchScriptClassifier::new(module, Device::Cpu, self.apply_softmax)))
    }
}

/// Reads the archive through a stream instead of letting libtorch open the path.
pub struct TorchScriptArchiveLoader {
    pub device: Device,
    pub apply_softmax: bool,
}

impl ModelLoader for TorchScriptArchiveLoader {
    fn name(&self) -> &'static str {
        "torchscript-archive"
    }

    fn load(&self, path: &Path) -> Result<Box<dyn Classifier>, LoadFailure> {
        let mut reader = BufReader::new(File::open(path)?);
        let module = CModule::load_data_on_device(&mut reader, self.device)?;
        Ok(Box::new(TorchScriptClassifier::new(module, self.device, self.apply_softmax)))
    }
}

/// Loaders tried in order. The first success wins; if all fail the first error is kept.
pub struct LoaderChain {
    loaders: Vec<Box<dyn ModelLoader>>,
}

impl LoaderChain {
    pub fn new(loaders: Vec<Box<dyn ModelLoader>>) -> Self {
        Self { loaders }
    }

    pub fn torchscript(apply_softmax: bool) -> Self {
        let device = Device::cuda_if_available();
        Self::new(vec![
            Box::new(TorchScriptLoader { device, apply_softmax }),
            Box::new(TorchScriptCpuLoader { apply_softmax }),
            Box::new(TorchScriptArchiveLoader { device, apply_softmax }),
        ])
    }

    pub fn load(&self, path: &Path) -> Result<Box<dyn Classifier>, LoadError> {
        let mut first_error: Option<(&'static str, LoadFailure)> = None;

        for loader in &self.loaders {
            match loader.load(path) {
                Ok(classifier) => {
                    log::info!(
                        "Model deserialized from {} with the {} loader ({})",
                        path.display(),
                        loader.name(),
                        classifier.describe()
                    );
                    return Ok(classifier);
                }
                Err(e) => {
                    log::warn!(
                        "{} loader failed for {}: {}",
                        loader.name(),
                        path.display(),
                        truncate(&e.to_string(), MAX_ERROR_CHARS)
                    );
                    if first_error.is_none() {
                        first_error = Some((loader.name(), e));
                    }
                }
            }
        }

        Err(match first_error {
            Some((name, e)) => LoadError::new(
                LoadStage::Deserializing,
                path,
                format!("{name} loader: {e}"),
            ),
            None => LoadError::new(LoadStage::Deserializing, path, "no loaders configured"),
        })
    }
}
