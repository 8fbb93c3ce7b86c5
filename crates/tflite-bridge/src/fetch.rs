//! Model byte retrieval.
//!
//! The loader only needs `url -> bytes`. Embedders with their own platform
//! fetch mechanism implement [`ModelFetcher`] (any
//! `Fn(&str) -> Result<ForeignBuffer, String>` closure does); everyone else
//! uses [`UrlFetcher`].

use crate::buffer::ForeignBuffer;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Retrieves model bytes for a path or URL. Called on a background worker.
pub trait ModelFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> BridgeResult<ForeignBuffer>;
}

impl<F> ModelFetcher for F
where
    F: Fn(&str) -> Result<ForeignBuffer, String> + Send + Sync,
{
    fn fetch(&self, url: &str) -> BridgeResult<ForeignBuffer> {
        self(url).map_err(|reason| BridgeError::fetch(url, reason))
    }
}

/// Fetches `http://` and `https://` URLs with a blocking HTTP client, and
/// `file://` URLs or bare paths from the filesystem.
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    agent: ureq::Agent,
}

impl UrlFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self { agent }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.fetch_timeout())
    }

    fn fetch_http(&self, url: &str) -> BridgeResult<ForeignBuffer> {
        log::debug!("Downloading model from {}", url);
        match self.agent.get(url).call() {
            Ok(response) => {
                let mut bytes = Vec::new();
                response
                    .into_reader()
                    .read_to_end(&mut bytes)
                    .map_err(|e| BridgeError::fetch(url, format!("failed reading response: {e}")))?;
                log::debug!("Downloaded {} bytes from {}", bytes.len(), url);
                Ok(ForeignBuffer::from_vec(bytes))
            }
            Err(ureq::Error::Status(code, _)) => Err(BridgeError::fetch(url, format!("HTTP status {code}"))),
            Err(e) => Err(BridgeError::fetch(url, e)),
        }
    }

    fn fetch_file(&self, url: &str, path: &Path) -> BridgeResult<ForeignBuffer> {
        std::fs::read(path)
            .map(ForeignBuffer::from_vec)
            .map_err(|e| BridgeError::fetch(url, e))
    }
}

impl Default for UrlFetcher {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl ModelFetcher for UrlFetcher {
    fn fetch(&self, url: &str) -> BridgeResult<ForeignBuffer> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url)
        } else if let Some(path) = url.strip_prefix("file://") {
            self.fetch_file(url, Path::new(path))
        } else {
            self.fetch_file(url, Path::new(url))
        }
    }
}
