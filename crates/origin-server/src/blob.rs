//! Evidence artifact storage.
//!
//! Two backends behind one handle: an S3-compatible store (MinIO in
//! docker-compose, S3 proper elsewhere) with presigned GET URLs, and a
//! filesystem store for development whose `file://` URLs the download
//! endpoint streams directly. Artifact keys are tenant-scoped:
//! `{tenant_id}/{certificate_id}/{format}`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer as _;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use secrecy::ExposeSecret as _;
use thiserror::Error;

use crate::config::BlobBackend;

/// Blob store failures. Transient from the caller's view unless noted.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The store is unreachable or the operation failed.
    #[error("blob store error: {0}")]
    Store(String),
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Self::NotFound(path),
            other => Self::Store(other.to_string()),
        }
    }
}

enum Backend {
    S3 { store: Arc<AmazonS3> },
    Local { store: Arc<LocalFileSystem>, root: PathBuf },
}

/// Handle to the artifact store.
pub struct BlobStore {
    backend: Backend,
}

impl BlobStore {
    /// Builds the store from configuration.
    ///
    /// The local backend creates its root directory eagerly so the first
    /// readiness probe does not race artifact writes.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Store`] if the backend cannot be constructed.
    pub fn from_config(backend: &BlobBackend, bucket: &str) -> Result<Self, BlobError> {
        match backend {
            BlobBackend::S3 {
                endpoint,
                access_key,
                secret_key,
            } => {
                let store = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key.expose_secret())
                    .with_region(
                        std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                    )
                    .with_allow_http(true)
                    .build()
                    .map_err(|e| BlobError::Store(e.to_string()))?;
                Ok(Self {
                    backend: Backend::S3 {
                        store: Arc::new(store),
                    },
                })
            }
            BlobBackend::Local { root } => {
                std::fs::create_dir_all(root).map_err(|e| BlobError::Store(e.to_string()))?;
                let store = LocalFileSystem::new_with_prefix(root)
                    .map_err(|e| BlobError::Store(e.to_string()))?;
                Ok(Self {
                    backend: Backend::Local {
                        store: Arc::new(store),
                        root: root.clone(),
                    },
                })
            }
        }
    }

    /// Writes an object.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError`] if the write fails.
    pub async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError> {
        let path = ObjectPath::from(key);

        match &self.backend {
            Backend::S3 { store } => {
                let mut attributes = Attributes::new();
                attributes.insert(Attribute::ContentType, content_type.to_string().into());
                let options = PutOptions {
                    attributes,
                    ..Default::default()
                };
                store.put_opts(&path, bytes.into(), options).await?;
            }
            // The filesystem backend has no content-type metadata; the
            // download endpoint derives it from the format instead.
            Backend::Local { store, .. } => {
                store.put(&path, bytes.into()).await?;
            }
        }
        Ok(())
    }

    /// Reads an object fully into memory. Artifacts are small by
    /// construction (rendered documents, not media).
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] for missing keys.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = ObjectPath::from(key);
        let result = match &self.backend {
            Backend::S3 { store } => store.get(&path).await?,
            Backend::Local { store, .. } => store.get(&path).await?,
        };
        Ok(result.bytes().await?.to_vec())
    }

    /// Produces a short-lived download URL for an object.
    ///
    /// S3 yields a presigned URL; the local backend yields a `file://` URL
    /// that only the in-process download endpoint dereferences.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError`] if URL signing fails.
    pub async fn presign(&self, key: &str, ttl: Duration) -> Result<String, BlobError> {
        match &self.backend {
            Backend::S3 { store } => {
                let url = store
                    .signed_url(http::Method::GET, &ObjectPath::from(key), ttl)
                    .await?;
                Ok(url.to_string())
            }
            Backend::Local { root, .. } => {
                Ok(format!("file://{}", root.join(key).display()))
            }
        }
    }

    /// Checks that the configured bucket (or local root) exists.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError`] if the probe itself fails for a reason other
    /// than absence.
    pub async fn bucket_exists(&self) -> Result<bool, BlobError> {
        match &self.backend {
            Backend::S3 { store } => match store.list_with_delimiter(None).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(e.into()),
            },
            Backend::Local { root, .. } => Ok(root.exists()),
        }
    }

    /// True for the development filesystem backend.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.backend, Backend::Local { .. })
    }
}

/// Tenant-scoped artifact key.
#[must_use]
pub fn artifact_key(tenant_id: i64, certificate_id: &str, format: &str) -> String {
    format!("{tenant_id}/{certificate_id}/{format}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_key_layout() {
        assert_eq!(artifact_key(7, "cert-1", "json"), "7/cert-1/json");
    }

    #[tokio::test]
    async fn test_local_roundtrip_and_presign() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = BlobBackend::Local {
            root: dir.path().to_path_buf(),
        };
        let store = BlobStore::from_config(&backend, "origin-evidence").unwrap();
        assert!(store.is_local());
        assert!(store.bucket_exists().await.unwrap());

        let key = artifact_key(1, "cert-1", "json");
        store
            .put(&key, b"{\"a\":1}".to_vec(), "application/json")
            .await
            .unwrap();
        let bytes = store.get(&key).await.unwrap();
        assert_eq!(bytes, b"{\"a\":1}");

        let url = store.presign(&key, Duration::from_secs(60)).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/1/cert-1/json"));
    }

    #[tokio::test]
    async fn test_local_missing_object() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = BlobBackend::Local {
            root: dir.path().to_path_buf(),
        };
        let store = BlobStore::from_config(&backend, "origin-evidence").unwrap();
        let result = store.get("1/none/json").await;
        assert!(matches!(result, Err(BlobError::NotFound(_))));
    }
}
