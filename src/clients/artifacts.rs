//! Artifact storage for generated documents and screenshots
//! Uses Apache Arrow object_store; the core only ever sees returned URLs

use object_store::{ObjectStore, path::Path as StoragePath};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// What a stored blob is, which fixes its key and file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Resume,
    CoverLetter,
    Screenshot,
}

impl DocumentKind {
    fn file_name(&self) -> &'static str {
        match self {
            DocumentKind::Resume => "resume.md",
            DocumentKind::CoverLetter => "cover_letter.md",
            DocumentKind::Screenshot => "screenshot.png",
        }
    }
}

/// Blob store client wrapping object_store
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    pub bucket: String,
    public_base_url: Option<String>,
}

impl ArtifactStore {
    /// Create a client over any object_store backend
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: String,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            store,
            bucket,
            public_base_url,
        }
    }

    /// In-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
            bucket: "applybox-local".to_string(),
            public_base_url: None,
        }
    }

    fn document_key(&self, application_id: u64, kind: DocumentKind) -> String {
        format!("applications/{}/{}", application_id, kind.file_name())
    }

    fn url_for(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("memory://{}/{}", self.bucket, key),
        }
    }

    /// Store one generated document and return its URL
    pub async fn put_document(
        &self,
        application_id: u64,
        kind: DocumentKind,
        data: Vec<u8>,
    ) -> Result<String> {
        let key = self.document_key(application_id, kind);
        let path = StoragePath::from(key.as_str());
        let size = data.len();

        self.store.put(&path, data.into()).await?;

        tracing::info!(key, size, "Stored artifact");
        Ok(self.url_for(&key))
    }

    /// Read back an artifact by key (tests, report rendering)
    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = StoragePath::from(key);
        let result = self.store.get(&path).await?;
        let bytes = result.bytes().await?;
        Ok(bytes.to_vec())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Cheap probe for health reporting
    pub async fn ping(&self) -> bool {
        self.exists("health/probe").await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_document_returns_memory_url() {
        let artifacts = ArtifactStore::in_memory();
        let url = artifacts
            .put_document(7, DocumentKind::Resume, b"# Resume".to_vec())
            .await
            .unwrap();
        assert_eq!(url, "memory://applybox-local/applications/7/resume.md");

        let data = artifacts
            .download("applications/7/resume.md")
            .await
            .unwrap();
        assert_eq!(data, b"# Resume");
    }

    #[tokio::test]
    async fn test_public_base_url_shapes_links() {
        let artifacts = ArtifactStore::new(
            Arc::new(object_store::memory::InMemory::new()),
            "artifacts".to_string(),
            Some("https://cdn.example.com/".to_string()),
        );
        let url = artifacts
            .put_document(7, DocumentKind::CoverLetter, b"Dear team".to_vec())
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://cdn.example.com/applications/7/cover_letter.md"
        );
    }

    #[tokio::test]
    async fn test_exists() {
        let artifacts = ArtifactStore::in_memory();
        assert!(!artifacts.exists("applications/9/resume.md").await.unwrap());
        artifacts
            .put_document(9, DocumentKind::Resume, b"x".to_vec())
            .await
            .unwrap();
        assert!(artifacts.exists("applications/9/resume.md").await.unwrap());
        assert!(artifacts.ping().await);
    }
}
