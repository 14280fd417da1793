//! Byte storage for uploaded source files.
//!
//! Uploads live either on the local filesystem or in a Google Cloud Storage
//! bucket (`gs://bucket/object`). [`ObjectStore`] routes each path to the right
//! backend so callers never branch on the scheme themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tokio::fs;
use tracing::debug;

use folio_core::{Error, Result};

/// URI scheme of cloud object paths.
pub const GCS_SCHEME: &str = "gs://";

/// Default GCS JSON API endpoint.
pub const DEFAULT_GCS_API_BASE: &str = "https://storage.googleapis.com";

/// Storage backend trait for reading and removing stored files.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read data from the specified path.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete data at the specified path. Deleting a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if data exists at the specified path.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Copy the object at `path` into the local file `dest`.
    async fn download_to(&self, path: &str, dest: &Path) -> Result<u64> {
        let bytes = self.read(path).await?;
        fs::write(dest, &bytes).await?;
        debug!(
            subsystem = "db",
            component = "file_storage",
            op = "download",
            path,
            bytes = bytes.len(),
            "Downloaded object"
        );
        Ok(bytes.len() as u64)
    }
}

/// Local filesystem backend. Relative paths resolve against the uploads folder.
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_path.join(p)
        }
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(format!(
                "File not found: {}",
                full_path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        if fs::try_exists(&full_path).await? {
            debug!(
                subsystem = "db",
                component = "file_storage",
                op = "delete",
                path = %full_path.display(),
                "Removing local file"
            );
            fs::remove_file(full_path).await?;
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(path)).await?)
    }
}

/// Configuration for the GCS backend.
#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub api_base: String,
    /// OAuth bearer token; obtaining it is the deployment's concern.
    pub access_token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GCS_API_BASE.to_string(),
            access_token: None,
            timeout_seconds: 120,
        }
    }
}

impl GcsConfig {
    /// Load from `GCS_API_BASE` and `GCS_ACCESS_TOKEN`.
    pub fn from_env() -> Self {
        Self {
            api_base: std::env::var("GCS_API_BASE")
                .unwrap_or_else(|_| DEFAULT_GCS_API_BASE.to_string()),
            access_token: std::env::var("GCS_ACCESS_TOKEN").ok(),
            ..Self::default()
        }
    }
}

/// Google Cloud Storage backend over the JSON API.
pub struct GcsBackend {
    client: Client,
    config: GcsConfig,
}

impl GcsBackend {
    pub fn new(config: GcsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create GCS client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Split `gs://bucket/object/name` into bucket and object name.
    pub fn parse_uri(path: &str) -> Result<(String, String)> {
        let rest = path
            .strip_prefix(GCS_SCHEME)
            .ok_or_else(|| Error::InvalidInput(format!("Not a gs:// path: {}", path)))?;
        match rest.split_once('/') {
            Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => {
                Ok((bucket.to_string(), object.to_string()))
            }
            _ => Err(Error::InvalidInput(format!(
                "gs:// path needs a bucket and object: {}",
                path
            ))),
        }
    }

    fn object_url(&self, path: &str) -> Result<Url> {
        let (bucket, object) = Self::parse_uri(path)?;
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| Error::Config(format!("Invalid GCS API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("GCS API base cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", bucket.as_str(), "o", object.as_str()]);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.access_token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn provider_error(response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Error::Provider { status, message }
    }
}

#[async_trait]
impl StorageBackend for GcsBackend {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let mut url = self.object_url(path)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.authorize(self.client.get(url)).send().await?;
        match response.status() {
            s if s.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("File not found: {}", path))),
            _ => Err(Self::provider_error(response).await),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.object_url(path)?;
        let response = self.authorize(self.client.delete(url)).send().await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::provider_error(response).await),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let url = self.object_url(path)?;
        let response = self.authorize(self.client.get(url)).send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::provider_error(response).await),
        }
    }
}

/// Routes `gs://` paths to GCS and everything else to the local filesystem.
pub struct ObjectStore {
    local: FilesystemBackend,
    gcs: Option<GcsBackend>,
}

impl ObjectStore {
    pub fn new(local: FilesystemBackend, gcs: Option<GcsBackend>) -> Self {
        Self { local, gcs }
    }

    /// Local-only store rooted at `uploads`.
    pub fn local(uploads: impl Into<PathBuf>) -> Self {
        Self::new(FilesystemBackend::new(uploads), None)
    }

    /// Build from `UPLOADS_FOLDER` and, when `GCS_BUCKET_NAME` is set, GCS settings.
    pub fn from_env() -> Result<Self> {
        let uploads = std::env::var("UPLOADS_FOLDER").unwrap_or_else(|_| "./data/uploads".into());
        let gcs = if std::env::var("GCS_BUCKET_NAME").is_ok() {
            Some(GcsBackend::new(GcsConfig::from_env())?)
        } else {
            None
        };
        Ok(Self::new(FilesystemBackend::new(uploads), gcs))
    }

    /// Whether `path` refers to a cloud object rather than a local file.
    pub fn is_remote(path: &str) -> bool {
        path.starts_with(GCS_SCHEME)
    }

    fn backend_for(&self, path: &str) -> Result<&dyn StorageBackend> {
        if Self::is_remote(path) {
            self.gcs
                .as_ref()
                .map(|g| g as &dyn StorageBackend)
                .ok_or_else(|| Error::Config(format!("No cloud storage configured for {}", path)))
        } else {
            Ok(&self.local)
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.backend_for(path)?.read(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.backend_for(path)?.delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.backend_for(path)?.exists(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_gcs_uri() {
        let (bucket, object) = GcsBackend::parse_uri("gs://notebooks/user/report.pdf").unwrap();
        assert_eq!(bucket, "notebooks");
        assert_eq!(object, "user/report.pdf");
    }

    #[test]
    fn test_parse_gcs_uri_rejects_bad_paths() {
        assert!(GcsBackend::parse_uri("/tmp/report.pdf").is_err());
        assert!(GcsBackend::parse_uri("gs://bucket-only").is_err());
        assert!(GcsBackend::parse_uri("gs:///object").is_err());
    }

    #[test]
    fn test_object_url_escapes_object_name() {
        let backend = GcsBackend::new(GcsConfig::default()).unwrap();
        let url = backend.object_url("gs://b/dir/file name.pdf").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/b/o/dir%2Ffile%20name.pdf"
        );
    }

    #[tokio::test]
    async fn test_filesystem_read_delete_exists() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        tokio::fs::write(dir.path().join("a.txt"), b"hello").await.unwrap();

        assert!(backend.exists("a.txt").await.unwrap());
        assert_eq!(backend.read("a.txt").await.unwrap(), b"hello");

        backend.delete("a.txt").await.unwrap();
        assert!(!backend.exists("a.txt").await.unwrap());
        // Second delete is a no-op.
        backend.delete("a.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_filesystem_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        let err = backend.read("missing.pdf").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_object_store_without_gcs_rejects_remote_paths() {
        let store = ObjectStore::local("/tmp");
        let err = store.read("gs://bucket/file.pdf").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_gcs_read_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/uploads/o/report.pdf"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/b/uploads/o/report.pdf"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let backend = GcsBackend::new(GcsConfig {
            api_base: server.uri(),
            access_token: Some("token".to_string()),
            timeout_seconds: 5,
        })
        .unwrap();

        let dest = tempfile::NamedTempFile::new().unwrap();
        let written = backend
            .download_to("gs://uploads/report.pdf", dest.path())
            .await
            .unwrap();
        assert_eq!(written, 4);
        assert_eq!(std::fs::read(dest.path()).unwrap(), b"%PDF");
        backend.delete("gs://uploads/report.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_gcs_missing_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let backend = GcsBackend::new(GcsConfig {
            api_base: server.uri(),
            access_token: None,
            timeout_seconds: 5,
        })
        .unwrap();

        assert!(!backend.exists("gs://uploads/gone.pdf").await.unwrap());
        let dest = tempfile::NamedTempFile::new().unwrap();
        assert!(backend.download_to("gs://uploads/gone.pdf", dest.path()).await.is_err());
        let err = backend.read("gs://uploads/gone.pdf").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
