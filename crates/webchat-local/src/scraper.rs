use crate::extract::{best_effort_text_from_bytes, truncate_chars};
use crate::{FetchRequest, LocalFetcher};
use std::collections::BTreeMap;
use std::time::Duration;
use webchat_core::{Error, PageScraper, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeTimeouts {
    /// Connect + full body download.
    pub download: Duration,
    /// Text extraction from the downloaded body.
    pub extraction: Duration,
}

impl Default for ScrapeTimeouts {
    fn default() -> Self {
        Self {
            download: Duration::from_secs(10),
            extraction: Duration::from_secs(5),
        }
    }
}

/// Fetch + extract for one candidate page, each step under its own budget.
#[derive(Debug, Clone)]
pub struct WebScraper {
    fetcher: LocalFetcher,
    timeouts: ScrapeTimeouts,
    max_bytes: u64,
    max_text_chars: usize,
}

impl WebScraper {
    pub fn new(client: reqwest::Client, timeouts: ScrapeTimeouts) -> Self {
        Self {
            fetcher: LocalFetcher::new(client),
            timeouts,
            max_bytes: 5_000_000,
            max_text_chars: 20_000,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_text_chars(mut self, max_text_chars: usize) -> Self {
        self.max_text_chars = max_text_chars;
        self
    }
}

#[async_trait::async_trait]
impl PageScraper for WebScraper {
    async fn scrape(&self, url: &str) -> Result<String> {
        let req = FetchRequest {
            url: url.to_string(),
            timeout_ms: Some(self.timeouts.download.as_millis() as u64),
            max_bytes: Some(self.max_bytes),
            headers: BTreeMap::new(),
        };
        let resp = self.fetcher.fetch(&req).await?;
        if !(200..300).contains(&resp.status) {
            return Err(Error::Fetch(format!("HTTP {} for {url}", resp.status)));
        }

        let bytes = resp.bytes;
        let content_type = resp.content_type;
        // Extraction is CPU-bound; on timeout the blocking task is abandoned, not cancelled.
        let job = tokio::task::spawn_blocking(move || {
            best_effort_text_from_bytes(&bytes, content_type.as_deref(), 100)
        });
        let extracted = tokio::time::timeout(self.timeouts.extraction, job)
            .await
            .map_err(|_| {
                Error::Extract(format!(
                    "extraction timed out after {}ms",
                    self.timeouts.extraction.as_millis()
                ))
            })?
            .map_err(|e| Error::Extract(format!("extraction join failed: {e}")))?;

        if extracted.is_empty() {
            return Err(Error::Extract(format!(
                "no text extracted (engine={})",
                extracted.engine
            )));
        }
        let (text, clipped) = truncate_chars(extracted.text.trim(), self.max_text_chars);
        tracing::debug!(%url, engine = extracted.engine, clipped, "scrape_webpage: returning page text");
        Ok(text)
    }
}
