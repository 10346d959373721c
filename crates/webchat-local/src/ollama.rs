use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use webchat_core::{ChatBackend, ChatMessage, Error, FragmentStream, Result};

pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout_ms: u64,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            timeout_ms: 300_000,
        }
    }

    /// For `chat`, a whole-request budget. For `chat_stream`, the wait for the
    /// response head and the longest silence between body chunks; a reply
    /// that keeps producing text is never cut off.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms.max(1);
        self
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn endpoint_chat(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn request(&self, messages: &[ChatMessage], stream: bool) -> reqwest::RequestBuilder {
        self.client
            .post(self.endpoint_chat())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&ChatRequest {
                model: &self.model,
                messages,
                stream,
            })
    }
}

fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Llm(format!("ollama chat HTTP {status}")));
    }
    Ok(resp)
}

#[async_trait::async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatMessage> {
        let resp = self
            .request(messages, false)
            .timeout(self.budget())
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let parsed: ChatResponse = check_status(resp)?
            .json()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        Ok(ChatMessage::assistant(parsed.message.content))
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream> {
        // No per-request timeout here: reqwest's would also bound the body.
        let resp = tokio::time::timeout(self.budget(), self.request(messages, true).send())
            .await
            .map_err(|_| Error::Llm(format!("no response head within {}ms", self.timeout_ms)))?
            .map_err(|e| Error::Llm(e.to_string()))?;
        Ok(ndjson_fragments(check_status(resp)?.bytes_stream(), Some(self.budget())))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

enum Line {
    Fragment(String),
    Skip,
    Done,
}

fn parse_line(line: &[u8]) -> Result<Line> {
    let s = String::from_utf8_lossy(line);
    let s = s.trim();
    if s.is_empty() {
        return Ok(Line::Skip);
    }
    let chunk: StreamChunk =
        serde_json::from_str(s).map_err(|e| Error::Llm(format!("bad stream chunk: {e}")))?;
    if let Some(err) = chunk.error {
        return Err(Error::Llm(err));
    }
    let content = chunk.message.unwrap_or_default().content;
    match (content.is_empty(), chunk.done) {
        (false, _) => Ok(Line::Fragment(content)),
        (true, true) => Ok(Line::Done),
        (true, false) => Ok(Line::Skip),
    }
}

struct NdjsonState<S> {
    body: Pin<Box<S>>,
    buf: Vec<u8>,
    idle: Option<Duration>,
    finished: bool,
}

/// Turn an NDJSON body of `/api/chat` chunks into non-empty content fragments.
///
/// Lines may be split across body chunks. The stream ends at the first
/// `done` chunk, at end of body, or after yielding one error. With `idle`
/// set, a body that goes silent for that long yields an error.
pub(crate) fn ndjson_fragments<S, B, E>(body: S, idle: Option<Duration>) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = NdjsonState {
        body: Box::pin(body),
        buf: Vec::new(),
        idle,
        finished: false,
    };
    Box::pin(futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }
            let line = match st.buf.iter().position(|b| *b == b'\n') {
                Some(pos) => st.buf.drain(..=pos).collect::<Vec<u8>>(),
                None => match next_chunk(&mut st).await {
                    Some(Ok(bytes)) => {
                        st.buf.extend_from_slice(bytes.as_ref());
                        continue;
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                    None => {
                        // Last line may lack a trailing newline.
                        st.finished = true;
                        std::mem::take(&mut st.buf)
                    }
                },
            };
            match parse_line(&line) {
                Ok(Line::Fragment(s)) => return Some((Ok(s), st)),
                Ok(Line::Skip) => {}
                Ok(Line::Done) => st.finished = true,
                Err(e) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
            }
        }
    }))
}

async fn next_chunk<S, B, E>(st: &mut NdjsonState<S>) -> Option<Result<B>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    E: std::fmt::Display,
{
    let next = match st.idle {
        Some(idle) => match tokio::time::timeout(idle, st.body.next()).await {
            Ok(next) => next,
            Err(_) => {
                return Some(Err(Error::Llm(format!(
                    "model stream stalled for {}ms",
                    idle.as_millis()
                ))))
            }
        },
        None => st.body.next().await,
    };
    next.map(|r| r.map_err(|e| Error::Llm(e.to_string())))
}
