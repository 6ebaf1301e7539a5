use std::path::{Path, PathBuf};

use shared::LabelScores;

use super::download::{DownloadOutcome, ensure_model_artifact};
use super::loader::{LoadError, LoadStage, LoaderChain};
use super::model::{Classifier, InferenceError};
use super::preprocess::{PreprocessError, PreprocessedTensor, prepare};
use crate::config::Config;

/// Class names in model output order.
pub const CLASS_LABELS: [&str; 10] = [
    "Zanahoria",
    "Brócoli",
    "Tomate",
    "Lechuga",
    "Pimiento",
    "Cebolla",
    "Papa",
    "Apio",
    "Pepino",
    "Calabacín",
];

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Classification model is not available")]
    ModelUnavailable,
    #[error("Model returned {actual} scores for {expected} labels")]
    OutputShape { expected: usize, actual: usize },
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error(transparent)]
    InvalidImage(#[from] PreprocessError),
    #[error(transparent)]
    Predict(#[from] PredictError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub prediction: String,
    pub confidence: f64,
    pub all_predictions: LabelScores,
    pub model_used: bool,
}

/// Process-wide model state. Built once before the server starts and only read afterwards.
pub struct PredictionService {
    classifier: Option<Box<dyn Classifier>>,
    labels: Vec<String>,
    model_path: PathBuf,
    model_url: Option<String>,
    load_error: Option<String>,
}

impl PredictionService {
    pub fn loaded(classifier: Box<dyn Classifier>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            classifier: Some(classifier),
            labels: CLASS_LABELS.iter().map(|s| s.to_string()).collect(),
            model_path: model_path.into(),
            model_url: None,
            load_error: None,
        }
    }

    pub fn unavailable(model_path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            classifier: None,
            labels: CLASS_LABELS.iter().map(|s| s.to_string()).collect(),
            model_path: model_path.into(),
            model_url: None,
            load_error: Some(reason.into()),
        }
    }

    fn with_url(mut self, url: Option<String>) -> Self {
        self.model_url = url;
        self
    }

    /// Runs download and deserialization. Failures leave the service in the
    /// unavailable state instead of aborting startup.
    pub async fn initialize(config: &Config) -> Self {
        let path = config.model_path.as_path();
        let url = config.model_url.clone();
        let chain = LoaderChain::torchscript(config.model_outputs_logits);

        match load_model(path, url.as_deref(), &chain).await {
            Ok(classifier) => {
                log::info!("Model stage {}: {}", LoadStage::Loaded, path.display());
                Self::loaded(classifier, path).with_url(url)
            }
            Err(e) => {
                log::error!(
                    "Model stage {} (stopped while {}): path={}, url={}, error={}",
                    LoadStage::Failed,
                    e.stage,
                    path.display(),
                    url.as_deref().unwrap_or("<none>"),
                    e.message
                );
                log::warn!("Service running without a model; /api/scan will be rejected");
                Self::unavailable(path, e.to_string()).with_url(url)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn model_url(&self) -> Option<&str> {
        self.model_url.as_deref()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn predict(
        &self,
        input: &PreprocessedTensor,
    ) -> Result<ClassificationResult, PredictError> {
        let classifier = self.classifier.as_ref().ok_or(PredictError::ModelUnavailable)?;
        let scores = classifier.forward(input)?;
        if scores.len() != self.labels.len() {
            return Err(PredictError::OutputShape {
                expected: self.labels.len(),
                actual: scores.len(),
            });
        }

        let (best, best_score) = argmax(&scores);
        let all_predictions = LabelScores(
            self.labels
                .iter()
                .zip(&scores)
                .map(|(label, &p)| (label.clone(), to_percent(p)))
                .collect(),
        );

        Ok(ClassificationResult {
            prediction: self.labels[best].clone(),
            confidence: to_percent(best_score),
            all_predictions,
            model_used: true,
        })
    }

    /// Decode, preprocess and classify raw upload bytes. Blocking.
    /// An undecodable image is reported even when no model is loaded.
    pub fn classify_bytes(&self, bytes: &[u8]) -> Result<ClassificationResult, ClassifyError> {
        let input = prepare(bytes)?;
        Ok(self.predict(&input)?)
    }
}

async fn load_model(
    path: &Path,
    url: Option<&str>,
    chain: &LoaderChain,
) -> Result<Box<dyn Classifier>, LoadError> {
    log::info!("Model stage {}: {}", LoadStage::Uninitialized, path.display());

    match ensure_model_artifact(path, url).await {
        Ok(DownloadOutcome::AlreadyPresent) => {}
        Ok(DownloadOutcome::Downloaded { bytes }) => {
            log::info!("Model stage {} finished: {} bytes", LoadStage::Downloading, bytes);
        }
        Err(e) => return Err(LoadError::new(LoadStage::Downloading, path, e)),
    }

    log::info!("Model stage {}: {}", LoadStage::Deserializing, path.display());
    chain.load(path)
}

/// Index and value of the largest score. Ties go to the lowest index and NaN never wins.
fn argmax(scores: &[f32]) -> (usize, f32) {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, &p) in scores.iter().enumerate() {
        if p > best_score {
            best = i;
            best_score = p;
        }
    }
    (best, if best_score.is_finite() { best_score } else { 0.0 })
}

fn to_percent(p: f32) -> f64 {
    (p as f64 * 10_000.0).round() / 100.0
}
