//! Deterministic in-memory backends for unit tests.

use crate::{
    ChatBackend, ChatMessage, Error, FragmentStream, PageScraper, Result, SearchCandidate,
    SearchProvider, SearchQuery, SearchResponse,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

pub(crate) struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    streams: Mutex<VecDeque<Vec<Result<String>>>>,
    fail: bool,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub(crate) fn replying<const N: usize>(replies: [&str; N]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            streams: Mutex::new(VecDeque::new()),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::replying([])
        }
    }

    /// Queue one streamed reply.
    pub(crate) fn stream(self, fragments: Vec<Result<String>>) -> Self {
        self.streams.lock().unwrap().push_back(fragments);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatBackend for ScriptedChat {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatMessage> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if self.fail {
            return Err(Error::Llm("connection refused".to_string()));
        }
        let next = self.replies.lock().unwrap().pop_front().unwrap_or_default();
        Ok(ChatMessage::assistant(next))
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if self.fail {
            return Err(Error::Llm("connection refused".to_string()));
        }
        let fragments = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Ok("ok".to_string())]);
        Ok(Box::pin(futures_util::stream::iter(fragments)))
    }
}

pub(crate) struct StubSearch {
    results: Option<Vec<SearchCandidate>>,
    queries: Mutex<Vec<String>>,
}

impl StubSearch {
    pub(crate) fn with(results: Vec<SearchCandidate>) -> Self {
        Self {
            results: Some(results),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            results: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SearchProvider for StubSearch {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        self.queries.lock().unwrap().push(q.query.clone());
        let Some(results) = self.results.clone() else {
            return Err(Error::SearchProviderUnavailable("HTTP 503".to_string()));
        };
        Ok(SearchResponse {
            results: results.into_iter().take(q.max_results).collect(),
            provider: "stub".to_string(),
            timings_ms: BTreeMap::new(),
        })
    }
}

/// Scrapes succeed only for URLs listed in `pages`.
pub(crate) struct StubScraper {
    pages: BTreeMap<String, String>,
    attempts: Mutex<Vec<String>>,
}

impl StubScraper {
    pub(crate) fn with<const N: usize>(pages: [(&str, &str); N]) -> Self {
        Self::from_pages(pages.iter().map(|(u, t)| (u.to_string(), t.to_string())))
    }

    pub(crate) fn from_pages(pages: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PageScraper for StubScraper {
    async fn scrape(&self, url: &str) -> Result<String> {
        self.attempts.lock().unwrap().push(url.to_string());
        match self.pages.get(url) {
            Some(t) if !t.trim().is_empty() => Ok(t.clone()),
            Some(_) => Err(Error::Extract("empty extraction".to_string())),
            None => Err(Error::Fetch(format!("HTTP 404 for {url}"))),
        }
    }
}

pub(crate) fn candidate(id: usize) -> SearchCandidate {
    SearchCandidate {
        id,
        title: format!("Result {id}"),
        link: format!("https://example.com/{id}"),
        snippet: format!("snippet {id}"),
    }
}
