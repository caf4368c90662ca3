use std::env;
use std::path::Path;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use tokio::fs;
use tracing::{info, warn};

use crate::config::{ModelSource, ServiceConfig};
use crate::error::ArtifactError;

async fn download_file(url: &str, path: &Path) -> Result<(), ArtifactError> {
    info!(url, path = %path.display(), "downloading model");

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    if let Ok(token) = env::var("GITHUB_TOKEN") {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("GITHUB_TOKEN contains invalid header characters, ignoring it"),
        }
    }

    let request_err = |source| ArtifactError::Request {
        url: url.to_string(),
        source,
    };

    let response = reqwest::Client::new()
        .get(url)
        .headers(headers)
        .send()
        .await
        .map_err(request_err)?;

    if !response.status().is_success() {
        return Err(ArtifactError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let bytes = response.bytes().await.map_err(request_err)?;

    let write_err = |source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    // never leave a half-written model behind
    let partial = path.with_extension("part");
    fs::write(&partial, &bytes).await.map_err(write_err)?;
    fs::rename(&partial, path).await.map_err(write_err)?;

    info!(path = %path.display(), bytes = bytes.len(), "model downloaded");
    Ok(())
}

async fn ensure_model_file(source: &ModelSource) -> Result<(), ArtifactError> {
    if source.model_path.exists() {
        return Ok(());
    }

    match &source.download_url {
        Some(url) => download_file(url, &source.model_path).await,
        None => Err(ArtifactError::Missing(source.model_path.clone())),
    }
}

/// Make sure both model files are on disk, fetching missing ones from
/// their configured URLs.
pub async fn ensure_model_files(config: &ServiceConfig) -> Result<(), ArtifactError> {
    info!("checking model files");
    ensure_model_file(&config.fruit).await?;
    ensure_model_file(&config.leaf).await
}
