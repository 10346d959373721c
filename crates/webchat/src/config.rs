//! `webchat.toml` loading: built-in defaults, then the config file, then
//! `WEBCHAT_*` environment overrides. CLI flags are applied by the caller.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use webchat_core::{AgentMode, AgentSettings, ScrapeLimits};

pub const CONFIG_DIR_NAME: &str = "webchat";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant. Answer clearly and concisely. \
When the user's message contains web search results, prefer them over your own knowledge for \
recent or factual questions.";

pub const DEFAULT_AGENT_MESSAGE: &str = "Use the following web search results to answer the user \
prompt at the end. If the results do not contain the answer, say so and answer from your own \
knowledge.";

pub const DEFAULT_DECIDE_MESSAGE: &str = "You decide whether a user prompt needs a live internet \
search to be answered well. Reply with exactly one word: True if current or external information \
is needed, False otherwise.";

pub const DEFAULT_QUERY_MESSAGE: &str = "You turn user prompts into short internet search \
queries. Reply with the search query only, without quotes or explanation.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// `[chat]` section: the model that writes the visible reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_message")]
    pub system_message: String,
    /// Wait for the reply to start, then the longest silence tolerated
    /// between streamed chunks. A reply that keeps streaming is never cut off.
    #[serde(default = "default_chat_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: default_model(),
            system_message: default_system_message(),
            timeout_ms: default_chat_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    webchat_local::ollama::DEFAULT_HOST.into()
}
fn default_model() -> String {
    "llama3.2".into()
}
fn default_system_message() -> String {
    DEFAULT_SYSTEM_MESSAGE.into()
}
fn default_chat_timeout_ms() -> u64 {
    120_000
}

/// `[agent]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: AgentMode,
    /// Preamble placed before the injected search results.
    #[serde(default = "default_agent_message")]
    pub agent_message: String,
    #[serde(default)]
    pub decide_to_search: StageConfig,
    #[serde(default)]
    pub generate_query: StageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: AgentMode::default(),
            agent_message: default_agent_message(),
            decide_to_search: StageConfig::default(),
            generate_query: StageConfig::default(),
            search: SearchConfig::default(),
            scrape: ScrapeConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_agent_message() -> String {
    DEFAULT_AGENT_MESSAGE.into()
}

/// A helper model call (`[agent.decide_to_search]`, `[agent.generate_query]`).
///
/// Unset host/model/timeout fall back to `[chat]`; an unset system message
/// falls back to the stage's built-in instruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StageConfig {
    fn filled(&self, chat: &ChatConfig, instruction: &str) -> Self {
        Self {
            host: Some(self.host.clone().unwrap_or_else(|| chat.host.clone())),
            model: Some(self.model.clone().unwrap_or_else(|| chat.model.clone())),
            system_message: Some(
                self.system_message
                    .clone()
                    .unwrap_or_else(|| instruction.to_string()),
            ),
            timeout_ms: Some(self.timeout_ms.unwrap_or(chat.timeout_ms)),
        }
    }
}

/// `[agent.search]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// SearXNG endpoint: a `{query}` template or a prefix the query is appended to.
    #[serde(default = "default_search_url")]
    pub url: String,
    #[serde(default = "default_num_search_results")]
    pub num_search_results: usize,
    #[serde(default = "default_num_sites_scraped")]
    pub num_sites_scraped: usize,
    #[serde(default = "default_max_scrape_tries")]
    pub max_scrape_tries: usize,
    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,
    /// Bytes of the results page read before parsing.
    #[serde(default = "default_listing_max_bytes")]
    pub max_bytes: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            num_search_results: default_num_search_results(),
            num_sites_scraped: default_num_sites_scraped(),
            max_scrape_tries: default_max_scrape_tries(),
            timeout_ms: default_search_timeout_ms(),
            max_bytes: default_listing_max_bytes(),
            headers: BTreeMap::new(),
        }
    }
}

fn default_search_url() -> String {
    "http://127.0.0.1:8080/search?q=".into()
}
fn default_num_search_results() -> usize {
    10
}
fn default_num_sites_scraped() -> usize {
    3
}
fn default_max_scrape_tries() -> usize {
    6
}
fn default_search_timeout_ms() -> u64 {
    20_000
}
fn default_listing_max_bytes() -> u64 {
    webchat_local::search::DEFAULT_LISTING_MAX_BYTES
}

/// `[agent.scrape]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_download_timeout_ms")]
    pub download_timeout_ms: u64,
    #[serde(default = "default_extraction_timeout_ms")]
    pub extraction_timeout_ms: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            download_timeout_ms: default_download_timeout_ms(),
            extraction_timeout_ms: default_extraction_timeout_ms(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_download_timeout_ms() -> u64 {
    10_000
}
fn default_extraction_timeout_ms() -> u64 {
    5_000
}
fn default_max_bytes() -> u64 {
    5_000_000
}

/// `<config_dir>/webchat/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Resolve the full configuration (everything except CLI flags).
///
/// An explicit path, or `WEBCHAT_CONFIG`, must exist. The default location is
/// optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let from_env = std::env::var("WEBCHAT_CONFIG")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let mut cfg = match explicit.map(Path::to_path_buf).or(from_env) {
        Some(path) => load_config_from(&path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_config_from(&path)?,
            path => {
                tracing::debug!(?path, "config file not found, using defaults");
                Config::default()
            }
        },
    };
    cfg.apply_env(|k| std::env::var(k).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    /// Apply `WEBCHAT_*` overrides; blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |k: &str| {
            lookup(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(v) = get("WEBCHAT_OLLAMA_HOST") {
            self.chat.host = v;
        }
        if let Some(v) = get("WEBCHAT_CHAT_MODEL") {
            self.chat.model = v;
        }
        if let Some(v) = get("WEBCHAT_SEARXNG_URL") {
            self.agent.search.url = v;
        }
        if let Some(v) = get("WEBCHAT_AGENT_MODE") {
            self.agent.mode = v.parse().context("WEBCHAT_AGENT_MODE")?;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        let s = &mut self.agent.search;
        if s.num_search_results == 0 {
            bail!("agent.search.num_search_results must be at least 1");
        }
        if s.num_sites_scraped == 0 {
            bail!("agent.search.num_sites_scraped must be at least 1");
        }
        if s.max_scrape_tries < s.num_sites_scraped {
            tracing::warn!(
                max_scrape_tries = s.max_scrape_tries,
                num_sites_scraped = s.num_sites_scraped,
                "max_scrape_tries below num_sites_scraped; raising it"
            );
            s.max_scrape_tries = s.num_sites_scraped;
        }
        if self.chat.model.trim().is_empty() {
            bail!("chat.model must not be empty");
        }
        Ok(())
    }

    pub fn decide_stage(&self) -> StageConfig {
        self.agent
            .decide_to_search
            .filled(&self.chat, DEFAULT_DECIDE_MESSAGE)
    }

    pub fn query_stage(&self) -> StageConfig {
        self.agent
            .generate_query
            .filled(&self.chat, DEFAULT_QUERY_MESSAGE)
    }

    /// The configuration with every inherited stage field spelled out.
    pub fn resolved(&self) -> Config {
        let mut out = self.clone();
        out.agent.decide_to_search = self.decide_stage();
        out.agent.generate_query = self.query_stage();
        out
    }

    pub fn agent_settings(&self) -> AgentSettings {
        let s = &self.agent.search;
        AgentSettings {
            mode: self.agent.mode,
            preamble: self.agent.agent_message.clone(),
            decide_instruction: self.decide_stage().system_message.unwrap_or_default(),
            query_instruction: self.query_stage().system_message.unwrap_or_default(),
            max_results: s.num_search_results,
            limits: ScrapeLimits::new(s.num_sites_scraped, s.max_scrape_tries),
        }
    }
}
