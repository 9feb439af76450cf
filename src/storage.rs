use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::Path;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config;
use crate::error::{AppError, AppResult};

/// key: image-store -> blob persistence seam
///
/// Upload handlers depend on this trait, not on the filesystem, so tests point
/// it at a temp dir and another backend can slot in without touching handlers.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persists `data` under `path` and returns the public URL serving it.
    async fn put(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Removes the blob. Missing blobs are an error; callers decide whether
    /// that matters.
    async fn delete(&self, path: &str) -> Result<()>;
}

pub struct LocalImageStore {
    root: String,
    public_base: String,
}

impl LocalImageStore {
    pub fn new(root: impl Into<String>, public_base: impl Into<String>) -> Self {
        let public_base: String = public_base.into();
        Self {
            root: root.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(config::STORAGE_ROOT.as_str(), config::APP_BASE_URL.as_str())
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn put(&self, path: &str, data: &[u8]) -> Result<String> {
        let full = format!("{}/{}", self.root, path);
        if let Some((dir, _)) = full.rsplit_once('/') {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {dir}"))?;
        }
        let mut file = fs::File::create(&full)
            .await
            .with_context(|| format!("creating {full}"))?;
        file.write_all(data)
            .await
            .with_context(|| format!("writing {full}"))?;
        Ok(format!("{}/media/{}", self.public_base, path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = format!("{}/{}", self.root, path);
        fs::remove_file(&full)
            .await
            .with_context(|| format!("removing {full}"))?;
        Ok(())
    }
}

/// Serves blobs written by [`LocalImageStore`] under `/media/*path`.
pub async fn serve_media(Path(path): Path<String>) -> AppResult<impl IntoResponse> {
    // stored paths never contain dot segments
    if path.split('/').any(|segment| segment == ".." || segment.is_empty()) {
        return Err(AppError::NotFound);
    }
    let full = format!("{}/{}", config::STORAGE_ROOT.as_str(), path);
    let data = fs::read(&full).await.map_err(|_| AppError::NotFound)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&path)),
    );
    Ok((headers, data))
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
