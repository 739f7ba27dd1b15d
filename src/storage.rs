use async_trait::async_trait;
use log::{error, info};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Public path prefix for locally stored uploads. Anything not under this
/// prefix (e.g. an externally hosted URL) is left alone on replace/delete.
pub const UPLOADS_PREFIX: &str = "/uploads/";

#[derive(Debug, Error)]
pub enum UploadStoreError {
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Store for profile pictures and resumes. Content-addressed: saving returns
/// the public path the file is served under.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn save(&self, bytes: &[u8]) -> Result<String, UploadStoreError>;
    async fn load(&self, name: &str) -> Result<(Vec<u8>, String), UploadStoreError>;
    async fn delete(&self, public_path: &str) -> Result<(), UploadStoreError>;
}

pub fn is_local_upload(public_path: &str) -> bool {
    public_path.starts_with(UPLOADS_PREFIX)
}

// ---------------- Filesystem implementation ----------------

pub struct FsUploadStore {
    root: PathBuf,
}

impl FsUploadStore {
    pub fn new() -> Self {
        let root = std::env::var("TT_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("uploads"));
        Self { root }
    }

    fn file_path(&self, name: &str) -> Option<PathBuf> {
        // reject traversal: stored names are hash.ext only
        if name.contains('/') || name.contains("..") || name.is_empty() {
            return None;
        }
        Some(self.root.join(name))
    }

    fn name_for(bytes: &[u8]) -> String {
        let hash = format!("{:x}", Sha256::digest(bytes));
        match infer::get(bytes) {
            Some(t) if !t.extension().is_empty() => format!("{hash}.{}", t.extension()),
            _ => hash,
        }
    }
}

impl Default for FsUploadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadStore for FsUploadStore {
    async fn save(&self, bytes: &[u8]) -> Result<String, UploadStoreError> {
        let name = Self::name_for(bytes);
        let path = self
            .file_path(&name)
            .ok_or_else(|| UploadStoreError::Other("bad name".into()))?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| UploadStoreError::Other(e.to_string()))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| UploadStoreError::Other(e.to_string()))?;
        Ok(format!("{UPLOADS_PREFIX}{name}"))
    }

    async fn load(&self, name: &str) -> Result<(Vec<u8>, String), UploadStoreError> {
        let path = self.file_path(name).ok_or(UploadStoreError::NotFound)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| UploadStoreError::NotFound)?;
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, public_path: &str) -> Result<(), UploadStoreError> {
        let Some(name) = public_path.strip_prefix(UPLOADS_PREFIX) else {
            // externally hosted, nothing to remove
            return Ok(());
        };
        let path = self.file_path(name).ok_or(UploadStoreError::NotFound)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("failed to remove upload {}: {e}", path.display());
                Err(UploadStoreError::Other(e.to_string()))
            }
        }
    }
}

pub fn build_upload_store() -> Arc<dyn UploadStore> {
    let store = FsUploadStore::new();
    info!("Using filesystem upload store at '{}'", store.root.display());
    Arc::new(store)
}
