//! HTTPS provider for the NOAA SWPC CTIPe MUF animation.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use animmuf_common::config::AppConfig;
use animmuf_common::error::FetchError;
use animmuf_frame_model::{Frame, FrameRef, Listing};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::provider::FrameProvider;

/// Listing saved to disk and reused while younger than `max_age`.
#[derive(Debug, Clone)]
pub struct ManifestCache {
    pub path: PathBuf,
    pub max_age: Duration,
}

impl ManifestCache {
    /// Cached listing bytes, if the file exists and is fresh enough.
    async fn read_fresh(&self) -> Option<Vec<u8>> {
        let modified = tokio::fs::metadata(&self.path).await.ok()?.modified().ok()?;
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age >= self.max_age {
            tracing::debug!(
                path = %self.path.display(),
                age_secs = age.as_secs(),
                "Cached listing expired"
            );
            return None;
        }
        tokio::fs::read(&self.path).await.ok()
    }

    async fn store(&self, bytes: &[u8]) {
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(err) = tokio::fs::write(&self.path, bytes).await {
            tracing::warn!(error = %err, path = %self.path.display(), "Failed to cache listing");
        }
    }
}

/// Fetches the listing and frames over HTTP(S).
pub struct HttpProvider {
    client: Client,
    source_url: String,
    base_url: String,
    cache: Option<ManifestCache>,
}

impl HttpProvider {
    pub fn new(
        source_url: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let source_url = source_url.into();
        let client = Client::builder()
            .user_agent(concat!("animmuf/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::transient(&source_url, format!("HTTP client setup: {e}")))?;

        Ok(Self {
            client,
            source_url,
            base_url: base_url.into(),
            cache: None,
        })
    }

    /// Provider configured from the application config, listing cached
    /// at `muf_file`.
    pub fn from_config(config: &AppConfig) -> Result<Self, FetchError> {
        Ok(Self::new(
            config.source_url.clone(),
            config.base_url.clone(),
            Duration::from_secs(config.fetch.request_timeout_secs),
        )?
        .with_manifest_cache(&config.muf_file, config.manifest_max_age))
    }

    pub fn with_manifest_cache(mut self, path: &Path, max_age: Duration) -> Self {
        self.cache = Some(ManifestCache {
            path: path.to_path_buf(),
            max_age,
        });
        self
    }

    /// Absolute URL for a listed frame path.
    pub fn frame_url(&self, source_id: &str) -> String {
        join_url(&self.base_url, source_id)
    }

    async fn get_bytes(&self, url: &str, id: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transient(id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(id, status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::transient(id, format!("reading body: {e}")))?;
        if body.is_empty() {
            return Err(FetchError::transient(id, "empty response body"));
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl FrameProvider for HttpProvider {
    async fn list_available(&self) -> Result<Listing, FetchError> {
        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.read_fresh().await {
                match Listing::parse(&bytes) {
                    Ok(listing) => {
                        tracing::info!(entries = listing.len(), "Using cached listing");
                        return Ok(listing);
                    }
                    Err(err) => tracing::warn!(error = %err, "Cached listing unreadable, refreshing"),
                }
            }
        }

        tracing::info!(url = %self.source_url, "Downloading listing");
        let bytes = self.get_bytes(&self.source_url, &self.source_url).await?;
        let listing = Listing::parse(&bytes)
            .map_err(|e| FetchError::transient(&self.source_url, e.to_string()))?;

        if let Some(cache) = &self.cache {
            cache.store(&bytes).await;
        }
        Ok(listing)
    }

    async fn fetch(&self, frame_ref: &FrameRef) -> Result<Frame, FetchError> {
        let url = self.frame_url(&frame_ref.source_id);
        tracing::debug!(url = %url, "Downloading frame");
        let bytes = self.get_bytes(&url, &frame_ref.source_id).await?;
        Ok(Frame::new(
            frame_ref.timestamp,
            frame_ref.source_id.clone(),
            bytes,
        ))
    }

    fn name(&self) -> &str {
        "noaa-swpc"
    }
}

/// Map a non-success status to a fetch error kind.
///
/// Timeouts, throttling, and server errors are transient; any other client
/// error means the frame will not come back.
pub fn classify_status(id: &str, status: StatusCode) -> FetchError {
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        FetchError::transient(id, format!("HTTP {status}"))
    } else {
        FetchError::gone(id, status.as_u16())
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use animmuf_common::error::FetchErrorKind;
    use chrono::{TimeZone, Utc};

    const LISTING: &[u8] = br#"[
        {"url": "/images/animations/ctipe/muf/CTIPe-MUF_20240302T030000.png"},
        {"url": "/images/animations/ctipe/muf/CTIPe-MUF_20240302T031000.png"}
    ]"#;

    // Nothing listens on the discard port, so any network access fails fast.
    const UNREACHABLE: &str = "http://127.0.0.1:9/ctipe_muf.json";

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://services.swpc.noaa.gov/experimental", "/images/a.png"),
            "https://services.swpc.noaa.gov/experimental/images/a.png"
        );
        assert_eq!(join_url("https://h/x/", "a.png"), "https://h/x/a.png");
        assert_eq!(join_url("https://h/x", "https://cdn/a.png"), "https://cdn/a.png");
    }

    #[test]
    fn test_classify_status() {
        let kind = |code: u16| classify_status("f", StatusCode::from_u16(code).unwrap()).kind();
        assert_eq!(kind(404), FetchErrorKind::Gone);
        assert_eq!(kind(410), FetchErrorKind::Gone);
        assert_eq!(kind(403), FetchErrorKind::Gone);
        assert_eq!(kind(408), FetchErrorKind::Transient);
        assert_eq!(kind(429), FetchErrorKind::Transient);
        assert_eq!(kind(500), FetchErrorKind::Transient);
        assert_eq!(kind(503), FetchErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_fresh_cached_listing_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("muf.json");
        std::fs::write(&cache, LISTING).unwrap();

        let provider = HttpProvider::new(UNREACHABLE, "http://127.0.0.1:9", Duration::from_secs(2))
            .unwrap()
            .with_manifest_cache(&cache, Duration::from_secs(3600));
        let listing = provider.list_available().await.unwrap();

        assert_eq!(listing.len(), 2);
        assert_eq!(
            listing.refs[1].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 2, 3, 10, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_expired_cache_goes_to_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("muf.json");
        std::fs::write(&cache, LISTING).unwrap();

        let provider = HttpProvider::new(UNREACHABLE, "http://127.0.0.1:9", Duration::from_secs(2))
            .unwrap()
            .with_manifest_cache(&cache, Duration::ZERO);
        let err = provider.list_available().await.unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_manifest_cache_creates_parent_and_expires() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ManifestCache {
            path: dir.path().join("state/muf.json"),
            max_age: Duration::from_secs(3600),
        };
        assert_eq!(cache.read_fresh().await, None);

        cache.store(LISTING).await;
        assert_eq!(cache.read_fresh().await.as_deref(), Some(LISTING));

        let expired = ManifestCache {
            max_age: Duration::ZERO,
            ..cache
        };
        assert_eq!(expired.read_fresh().await, None);
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        let provider =
            HttpProvider::new(UNREACHABLE, "http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let frame_ref = FrameRef {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 2, 3, 0, 0).unwrap(),
            source_id: "/images/CTIPe-MUF_20240302T030000.png".to_string(),
        };

        let err = provider.fetch(&frame_ref).await.unwrap_err();
        assert!(err.is_transient());
    }
}
