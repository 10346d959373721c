//! The web-search augmenter: decide → query → list → scrape → assemble.

use crate::assemble::assemble;
use crate::scrape::{collect_contexts, ScrapeLimits};
use crate::stages::{decide_to_search, generate_query};
use crate::{
    Augmentation, ChatBackend, Error, PageScraper, PromptAugmenter, Result, SearchProvider,
    SearchQuery,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Every message is augmented.
    #[default]
    Explicit,
    /// A classifier decides per message.
    Conditional,
}

impl FromStr for AgentMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explicit" => Ok(Self::Explicit),
            "conditional" => Ok(Self::Conditional),
            other => Err(Error::NotConfigured(format!(
                "unknown agent mode {other:?} (expected explicit|conditional)"
            ))),
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Explicit => "explicit",
            Self::Conditional => "conditional",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub mode: AgentMode,
    /// Fixed text placed before the injected search results.
    pub preamble: String,
    pub decide_instruction: String,
    pub query_instruction: String,
    /// Listing cap passed to the search provider.
    pub max_results: usize,
    pub limits: ScrapeLimits,
}

pub struct WebSearchAgent {
    settings: AgentSettings,
    classifier: Arc<dyn ChatBackend>,
    generator: Arc<dyn ChatBackend>,
    search: Arc<dyn SearchProvider>,
    scraper: Arc<dyn PageScraper>,
}

impl WebSearchAgent {
    pub fn new(
        settings: AgentSettings,
        classifier: Arc<dyn ChatBackend>,
        generator: Arc<dyn ChatBackend>,
        search: Arc<dyn SearchProvider>,
        scraper: Arc<dyn PageScraper>,
    ) -> Self {
        tracing::info!(mode = %settings.mode, "web search agent ready");
        Self {
            settings,
            classifier,
            generator,
            search,
            scraper,
        }
    }

    pub fn mode(&self) -> AgentMode {
        self.settings.mode
    }

    pub fn set_mode(&mut self, mode: AgentMode) {
        tracing::info!(%mode, "web search agent mode changed");
        self.settings.mode = mode;
    }

    /// Run the pipeline once and report failures as typed errors.
    ///
    /// A "no" from the classifier is not an error: it yields an unmodified
    /// augmentation. Listing failures and an all-failed scrape are.
    pub async fn run(&self, utterance: &str) -> Result<Augmentation> {
        if self.settings.mode == AgentMode::Conditional {
            let needed = decide_to_search(
                self.classifier.as_ref(),
                &self.settings.decide_instruction,
                utterance,
            )
            .await?;
            if !needed {
                tracing::info!("web search agent: search not needed");
                return Ok(Augmentation::unmodified(utterance));
            }
        }

        let query = generate_query(
            self.generator.as_ref(),
            &self.settings.query_instruction,
            utterance,
        )
        .await?;

        let listing = self
            .search
            .search(&SearchQuery {
                query,
                max_results: self.settings.max_results,
            })
            .await
            .map_err(|e| match e {
                Error::SearchProviderUnavailable(_) => e,
                other => Error::SearchProviderUnavailable(other.to_string()),
            })?;
        tracing::info!(
            provider = %listing.provider,
            candidates = listing.results.len(),
            "web search agent: listing fetched"
        );

        let report = collect_contexts(
            self.scraper.as_ref(),
            &listing.results,
            self.settings.limits,
        )
        .await;
        if report.is_empty() {
            return Err(Error::AllScrapesFailed {
                attempts: report.attempts,
            });
        }
        tracing::info!(
            scraped = report.contexts.len(),
            attempts = report.attempts,
            "web search agent: pages scraped"
        );

        let q = assemble(&self.settings.preamble, &report.contexts, utterance);
        tracing::debug!(query = %q.text, "web search agent: augmented query");
        Ok(Augmentation {
            used: true,
            content: q.text,
            sources: q.source_urls,
        })
    }
}

#[async_trait::async_trait]
impl PromptAugmenter for WebSearchAgent {
    fn name(&self) -> &'static str {
        "websearch"
    }

    async fn augment(&self, utterance: &str) -> Augmentation {
        match self.run(utterance).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "web search skipped; forwarding prompt unmodified");
                Augmentation::unmodified(utterance)
            }
        }
    }
}
