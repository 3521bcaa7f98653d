use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::ImageClassifier;
use super::onnx::OnnxClassifier;
use crate::config::Args;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("no model at {} and no MODEL_URL to download it from", path.display())]
    NoSource { path: PathBuf },
    #[error("model download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("model checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("model file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse model: {0}")]
    Parse(String),
    #[error("model loading task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Where the model artifact lives and how to get it.
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub url: Option<String>,
    pub path: PathBuf,
    pub sha256: Option<String>,
    pub timeout: Duration,
}

impl From<&Args> for ModelSource {
    fn from(args: &Args) -> Self {
        Self {
            url: args.model_url.clone(),
            path: args.model_path.clone(),
            sha256: args.model_sha256.clone(),
            timeout: args.download_timeout(),
        }
    }
}

/// Downloads the artifact to `source.path` unless a file is already there.
pub async fn fetch_model(
    client: &reqwest::Client,
    source: &ModelSource,
) -> Result<(), ModelLoadError> {
    if tokio::fs::try_exists(&source.path).await? {
        tracing::info!("Model file already exists at {}", source.path.display());
        return Ok(());
    }

    let Some(url) = source.url.as_deref() else {
        return Err(ModelLoadError::NoSource {
            path: source.path.clone(),
        });
    };

    tracing::info!("Downloading model from {url}");
    let bytes = client
        .get(url)
        .timeout(source.timeout)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    if let Some(expected) = source.sha256.as_deref() {
        let actual = format!("{:x}", Sha256::digest(&bytes));
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(ModelLoadError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    write_atomically(&source.path, &bytes).await?;
    tracing::info!(
        "Model downloaded successfully to {} ({} bytes)",
        source.path.display(),
        bytes.len()
    );
    Ok(())
}

// A crash mid-write must not leave a truncated file that later starts would trust
async fn write_atomically(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = dest.with_extension("part");
    tokio::fs::write(&partial, bytes).await?;
    tokio::fs::rename(&partial, dest).await
}

/// Fetches the artifact if needed and loads it on the blocking pool.
pub async fn load_classifier(
    client: &reqwest::Client,
    source: &ModelSource,
) -> Result<Arc<dyn ImageClassifier>, ModelLoadError> {
    fetch_model(client, source).await?;

    let path = source.path.clone();
    let classifier = tokio::task::spawn_blocking(move || OnnxClassifier::load(&path))
        .await?
        .map_err(|e| ModelLoadError::Parse(e.to_string()))?;

    tracing::info!("Model loaded successfully");
    Ok(Arc::new(classifier))
}
