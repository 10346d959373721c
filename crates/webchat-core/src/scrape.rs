//! Bounded best-effort retrieval over ranked candidates.

use crate::{PageScraper, ScrapedContext, SearchCandidate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeLimits {
    /// Stop once this many pages were scraped successfully.
    pub target: usize,
    /// Never try more than this many candidates.
    pub max_attempts: usize,
}

impl ScrapeLimits {
    /// `max_attempts` is raised to `target` when configured below it.
    pub fn new(target: usize, max_attempts: usize) -> Self {
        Self {
            target,
            max_attempts: max_attempts.max(target),
        }
    }
}

impl Default for ScrapeLimits {
    fn default() -> Self {
        Self::new(3, 6)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeReport {
    /// Successful scrapes, in the order they succeeded.
    pub contexts: Vec<ScrapedContext>,
    pub attempts: usize,
}

impl ScrapeReport {
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Walk `candidates` in rank order and collect up to `limits.target` pages.
///
/// Individual failures are logged and skipped. This never fails; a report
/// with no contexts means nothing usable was found.
pub async fn collect_contexts(
    scraper: &dyn PageScraper,
    candidates: &[SearchCandidate],
    limits: ScrapeLimits,
) -> ScrapeReport {
    let mut report = ScrapeReport::default();
    if limits.target == 0 {
        return report;
    }
    for c in candidates.iter().take(limits.max_attempts) {
        report.attempts += 1;
        match scraper.scrape(&c.link).await {
            Ok(text) if !text.trim().is_empty() => {
                tracing::debug!(url = %c.link, chars = text.len(), "scrape: ok");
                report.contexts.push(ScrapedContext {
                    name: c.title.clone(),
                    url: c.link.clone(),
                    text,
                });
                if report.contexts.len() >= limits.target {
                    break;
                }
            }
            Ok(_) => {
                tracing::debug!(url = %c.link, "scrape: empty extraction");
            }
            Err(e) => {
                tracing::debug!(url = %c.link, error = %e, "scrape: failed");
            }
        }
    }
    report
}
