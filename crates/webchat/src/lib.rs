//! `webchat` crate (library surface).
//!
//! The binary is the primary entrypoint. This library holds configuration
//! loading and the wiring from a [`config::Config`] to a ready [`ChatEngine`],
//! so integration tests and embedders can reuse it, plus the [`eval`]
//! harness for the helper stages.

pub mod config;
pub mod eval;

use config::{Config, StageConfig};
use std::sync::Arc;
use std::time::Duration;
use webchat_core::{ChatEngine, WebSearchAgent};
use webchat_local::{OllamaClient, ScrapeTimeouts, SearxngHtmlProvider, WebScraper};

fn stage_client(client: &reqwest::Client, stage: &StageConfig, chat: &config::ChatConfig) -> OllamaClient {
    OllamaClient::new(
        client.clone(),
        stage.host.clone().unwrap_or_else(|| chat.host.clone()),
        stage.model.clone().unwrap_or_else(|| chat.model.clone()),
    )
    .with_timeout_ms(stage.timeout_ms.unwrap_or(chat.timeout_ms))
}

/// Build the web-search augmenter: two helper model clients, the SearXNG
/// listing provider and the page scraper, all sharing one HTTP client.
pub fn build_agent(cfg: &Config, client: &reqwest::Client) -> WebSearchAgent {
    let search = &cfg.agent.search;
    let scrape = &cfg.agent.scrape;
    let classifier = stage_client(client, &cfg.decide_stage(), &cfg.chat);
    let generator = stage_client(client, &cfg.query_stage(), &cfg.chat);
    let provider = SearxngHtmlProvider::new(
        client.clone(),
        search.url.clone(),
        search.headers.clone(),
        search.timeout_ms,
    )
    .with_max_bytes(search.max_bytes);
    let scraper = WebScraper::new(
        client.clone(),
        ScrapeTimeouts {
            download: Duration::from_millis(scrape.download_timeout_ms),
            extraction: Duration::from_millis(scrape.extraction_timeout_ms),
        },
    )
    .with_max_bytes(scrape.max_bytes);

    WebSearchAgent::new(
        cfg.agent_settings(),
        Arc::new(classifier),
        Arc::new(generator),
        Arc::new(provider),
        Arc::new(scraper),
    )
}

/// Build a fresh session; the web-search augmenter is attached when enabled.
pub fn build_engine(cfg: &Config, client: &reqwest::Client) -> ChatEngine {
    let backend = OllamaClient::new(client.clone(), cfg.chat.host.clone(), cfg.chat.model.clone())
        .with_timeout_ms(cfg.chat.timeout_ms);
    let engine = ChatEngine::new(Arc::new(backend), cfg.chat.system_message.clone());
    if cfg.agent.enabled {
        engine.with_augmenter(Arc::new(build_agent(cfg, client)))
    } else {
        tracing::info!("web search agent disabled");
        engine
    }
}
