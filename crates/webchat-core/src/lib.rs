//! Backend-agnostic types, traits and the search-augmentation pipeline.
//!
//! This crate performs no IO of its own: model calls, listing requests and page
//! fetches all go through the traits below. `webchat-local` provides the reqwest
//! implementations.

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod agent;
pub mod assemble;
pub mod engine;
pub mod scrape;
pub mod stages;

#[cfg(test)]
pub(crate) mod stubs;

pub use agent::{AgentMode, AgentSettings, WebSearchAgent};
pub use assemble::{assemble, AugmentedQuery};
pub use engine::{ChatEngine, Reply, ReplyStream};
pub use scrape::{collect_contexts, ScrapeLimits, ScrapeReport};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("extract failed: {0}")]
    Extract(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),
    #[error("query generation failed: {0}")]
    QueryGenerationFailed(String),
    #[error("search provider unavailable: {0}")]
    SearchProviderUnavailable(String),
    #[error("no page could be scraped ({attempts} attempts)")]
    AllScrapesFailed { attempts: usize },
    #[error("conversation is busy with another message")]
    ConversationBusy,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation, in the shape chat backends expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Lazily produced reply fragments. Single pass; not restartable.
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// One non-streaming round trip.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatMessage>;

    /// Streaming round trip. The returned stream owns everything it needs.
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream>;
}

/// A ranked entry from a search listing, before any page is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCandidate {
    /// 1-based position in the provider's listing.
    pub id: usize,
    pub title: String,
    pub link: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Provider rank order.
    pub results: Vec<SearchCandidate>,
    pub provider: String,
    pub timings_ms: BTreeMap<String, u128>,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

/// Fetches one page and returns its extracted plain text.
///
/// Implementations apply their own download/extraction timeouts. An empty
/// extraction should be reported as an error, not as `Ok("")`.
#[async_trait::async_trait]
pub trait PageScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<String>;
}

/// Text extracted from one successfully scraped candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedContext {
    pub name: String,
    pub url: String,
    pub text: String,
}

/// What the last processed message did with web search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub used: bool,
    pub source_urls: Vec<String>,
}

/// Result of running one augmenter over an utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Augmentation {
    pub used: bool,
    /// The augmented prompt when `used`, otherwise the raw utterance.
    pub content: String,
    pub sources: Vec<String>,
}

impl Augmentation {
    pub fn unmodified(utterance: &str) -> Self {
        Self {
            used: false,
            content: utterance.to_string(),
            sources: Vec::new(),
        }
    }
}

/// Something that may rewrite a user utterance before it reaches the model.
///
/// `augment` never fails: implementations degrade to
/// [`Augmentation::unmodified`] and log why.
#[async_trait::async_trait]
pub trait PromptAugmenter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn augment(&self, utterance: &str) -> Augmentation;
}
