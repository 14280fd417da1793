//! Content extraction strategies and capability-based selection.
//!
//! [`ContentServiceExtractor`] talks to the HTTP extraction service and
//! supports the full pipeline. [`NativeExtractor`] reads inline text or a
//! local file and supports the reduced pipeline only. [`ExtractorSelector`]
//! probes the service and falls back to the native strategy while the service
//! is unreachable; probe results are cached for a few minutes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use folio_core::defaults::{EXTRACTION_PROBE_TIMEOUT_SECS, EXTRACTION_PROBE_TTL_SECS};
use folio_core::{
    ContentDescriptor, ContentExtractor, Error, ExtractedContent, ExtractionMode,
    ExtractionRequest, Result, TtlCache,
};

/// Default timeout for extraction requests (seconds).
pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 240;

/// Configuration for the HTTP extraction service.
#[derive(Debug, Clone)]
pub struct ContentServiceConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl ContentServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_seconds: DEFAULT_EXTRACTION_TIMEOUT_SECS,
        }
    }

    /// `EXTRACTION_SERVICE_URL`, or `None` when unset.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("EXTRACTION_SERVICE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let timeout_seconds = std::env::var("EXTRACTION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_EXTRACTION_TIMEOUT_SECS);
        Some(Self {
            base_url,
            timeout_seconds,
        })
    }
}

/// Full-pipeline extractor backed by the extraction service.
pub struct ContentServiceExtractor {
    client: Client,
    config: ContentServiceConfig,
}

impl ContentServiceExtractor {
    pub fn new(config: ContentServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ContentExtractor for ContentServiceExtractor {
    fn name(&self) -> &str {
        "content_service"
    }

    fn mode(&self) -> ExtractionMode {
        ExtractionMode::Full
    }

    #[instrument(
        skip(self, request),
        fields(subsystem = "extraction", component = "content_service", op = "extract", kind = request.content.kind())
    )]
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractedContent> {
        let response = self
            .client
            .post(self.endpoint("extract"))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("Extraction service timed out: {}", e))
                } else {
                    Error::Extraction(format!("Extraction service unreachable: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Extraction(format!(
                "Extraction service returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let extracted: ExtractedContent = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Invalid extraction response: {}", e)))?;
        debug!(
            content_len = extracted.content.len(),
            identified_type = extracted.identified_type.as_deref().unwrap_or("unknown"),
            "Extraction finished"
        );
        Ok(extracted)
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.endpoint("health"))
            .timeout(Duration::from_secs(EXTRACTION_PROBE_TIMEOUT_SECS))
            .send()
            .await;
        Ok(matches!(response, Ok(r) if r.status().is_success()))
    }
}

/// Reduced-pipeline extractor: inline text as-is, local files read as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeExtractor;

#[async_trait]
impl ContentExtractor for NativeExtractor {
    fn name(&self) -> &str {
        "native"
    }

    fn mode(&self) -> ExtractionMode {
        ExtractionMode::Reduced
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractedContent> {
        match &request.content {
            ContentDescriptor::Text { content } => Ok(ExtractedContent {
                content: content.clone(),
                identified_type: Some("text/plain".to_string()),
                ..Default::default()
            }),
            ContentDescriptor::File { file_path } => {
                let bytes = tokio::fs::read(file_path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::NotFound(format!("File not found: {}", file_path))
                    } else {
                        Error::Io(e)
                    }
                })?;
                Ok(ExtractedContent {
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                    file_path: Some(file_path.clone()),
                    ..Default::default()
                })
            }
            ContentDescriptor::Url { url } => Err(Error::Extraction(format!(
                "Cannot fetch {} without the extraction service",
                url
            ))),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Picks the full extractor while it is healthy, the fallback otherwise.
pub struct ExtractorSelector {
    primary: Option<Arc<dyn ContentExtractor>>,
    fallback: Arc<dyn ContentExtractor>,
    probe: TtlCache<&'static str, bool>,
    probe_ttl: Duration,
}

impl ExtractorSelector {
    pub fn new(
        primary: Option<Arc<dyn ContentExtractor>>,
        fallback: Arc<dyn ContentExtractor>,
    ) -> Self {
        Self {
            primary,
            fallback,
            probe: TtlCache::new(),
            probe_ttl: Duration::from_secs(EXTRACTION_PROBE_TTL_SECS),
        }
    }

    /// Native extraction only.
    pub fn native() -> Self {
        Self::new(None, Arc::new(NativeExtractor))
    }

    /// Extraction service from `EXTRACTION_SERVICE_URL` with native fallback.
    pub fn from_env() -> Result<Self> {
        let primary = match ContentServiceConfig::from_env() {
            Some(config) => {
                info!(
                    subsystem = "extraction",
                    base_url = %config.base_url,
                    "Using extraction service"
                );
                Some(Arc::new(ContentServiceExtractor::new(config)?) as Arc<dyn ContentExtractor>)
            }
            None => {
                warn!(
                    subsystem = "extraction",
                    "EXTRACTION_SERVICE_URL not set; sources use native extraction"
                );
                None
            }
        };
        Ok(Self::new(primary, Arc::new(NativeExtractor)))
    }

    pub fn with_probe_ttl(mut self, ttl: Duration) -> Self {
        self.probe_ttl = ttl;
        self
    }

    /// Strategy to use for the next extraction.
    pub async fn select(&self) -> Arc<dyn ContentExtractor> {
        let Some(primary) = &self.primary else {
            return self.fallback.clone();
        };

        let healthy = self
            .probe
            .get_or_refresh("primary", self.probe_ttl, || async {
                let healthy = primary.health_check().await.unwrap_or(false);
                debug!(
                    subsystem = "extraction",
                    extractor = primary.name(),
                    healthy,
                    "Probed extractor"
                );
                Ok(healthy)
            })
            .await
            .unwrap_or(false);

        if healthy {
            primary.clone()
        } else {
            warn!(
                subsystem = "extraction",
                extractor = primary.name(),
                fallback = self.fallback.name(),
                "Extractor unavailable, using reduced pipeline"
            );
            self.fallback.clone()
        }
    }

    /// Forget the cached probe so the next selection re-checks the service.
    pub async fn reprobe(&self) {
        self.probe.invalidate(&"primary").await;
    }
}
