//! External frame classification.
//!
//! The classifier is a separate binary: it receives a directory of JPEG
//! stills and prints a JSON array of per-image scores. Its failures
//! never fail the transcode; the gallery stage downgrades to a skip.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::JobError;

/// Per-image scores returned by the classifier.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct FrameScore {
    /// File name relative to the classified directory.
    pub file: String,
    pub nsfw_score: f64,
    pub face_score: f64,
    pub aesthetic_score: f64,
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait FrameClassifier: Send + Sync {
    async fn classify_dir(&self, dir: &Path) -> Result<Vec<FrameScore>, JobError>;
}

/// Invokes the configured classifier command on a directory.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    path: String,
}

impl CommandClassifier {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FrameClassifier for CommandClassifier {
    async fn classify_dir(&self, dir: &Path) -> Result<Vec<FrameScore>, JobError> {
        let output = Command::new(&self.path)
            .arg(dir)
            .output()
            .await
            .map_err(|e| JobError::Classifier(format!("spawn classifier: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::Classifier(format!(
                "classifier exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let scores: Vec<FrameScore> = serde_json::from_slice(&output.stdout)
            .map_err(|e| JobError::Classifier(format!("classifier output: {e}")))?;
        debug!("Classified {} frame(s) in {dir:?}", scores.len());
        Ok(scores)
    }
}
