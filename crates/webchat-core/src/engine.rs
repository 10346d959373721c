//! Conversation manager: owns the turn history, runs augmenters per message
//! and streams the model's reply.
//!
//! History is single-writer. `process_message` takes the history lock and the
//! returned [`ReplyStream`] keeps it until the reply is finished, so a second
//! message on the same engine waits for the first one to complete.

use crate::{
    ChatBackend, ChatMessage, Error, FragmentStream, PromptAugmenter, Result, SearchOutcome,
};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct ChatEngine {
    backend: Arc<dyn ChatBackend>,
    augmenters: Vec<Arc<dyn PromptAugmenter>>,
    turns: Arc<Mutex<Vec<ChatMessage>>>,
    last_outcome: std::sync::Mutex<SearchOutcome>,
}

/// Everything the caller gets back for one message.
pub struct Reply {
    /// Fixed before the first fragment is produced.
    pub outcome: SearchOutcome,
    pub stream: ReplyStream,
}

impl ChatEngine {
    pub fn new(backend: Arc<dyn ChatBackend>, system_message: impl Into<String>) -> Self {
        Self {
            backend,
            augmenters: Vec::new(),
            turns: Arc::new(Mutex::new(vec![ChatMessage::system(system_message)])),
            last_outcome: std::sync::Mutex::new(SearchOutcome::default()),
        }
    }

    pub fn with_augmenter(mut self, augmenter: Arc<dyn PromptAugmenter>) -> Self {
        self.augmenters.push(augmenter);
        self
    }

    /// Process one user message, waiting for any in-flight reply to finish.
    pub async fn process_message(&self, utterance: &str) -> Result<Reply> {
        let turns = self.turns.clone().lock_owned().await;
        self.process_locked(turns, utterance).await
    }

    /// Like [`process_message`](Self::process_message) but refuses instead of waiting.
    pub async fn try_process_message(&self, utterance: &str) -> Result<Reply> {
        let turns = self
            .turns
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::ConversationBusy)?;
        self.process_locked(turns, utterance).await
    }

    async fn process_locked(
        &self,
        mut turns: OwnedMutexGuard<Vec<ChatMessage>>,
        utterance: &str,
    ) -> Result<Reply> {
        self.set_last_outcome(SearchOutcome::default());

        let mut content = utterance.to_string();
        let mut outcome = SearchOutcome::default();
        for augmenter in &self.augmenters {
            let a = augmenter.augment(utterance).await;
            if a.used {
                tracing::info!(augmenter = augmenter.name(), sources = a.sources.len(), "prompt augmented");
                content = a.content;
                outcome = SearchOutcome {
                    used: true,
                    source_urls: a.sources,
                };
            }
        }
        self.set_last_outcome(outcome.clone());

        tracing::debug!(%content, "chat engine: forwarding user turn");
        turns.push(ChatMessage::user(content));

        let inner = match self.backend.chat_stream(&turns).await {
            Ok(s) => s,
            Err(e) => {
                // Nothing was answered; leave history as it was before this message.
                turns.pop();
                return Err(e);
            }
        };

        Ok(Reply {
            outcome,
            stream: ReplyStream {
                inner: Some(inner),
                turns: Some(turns),
                text: String::new(),
            },
        })
    }

    pub fn last_outcome(&self) -> SearchOutcome {
        self.last_outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_last_outcome(&self, outcome: SearchOutcome) {
        *self.last_outcome.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    }

    /// Snapshot of the conversation. Waits for an in-flight reply to finish.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.turns.lock().await.clone()
    }

    /// Drop everything except the system turn.
    pub async fn reset(&self) {
        self.turns.lock().await.truncate(1);
        self.set_last_outcome(SearchOutcome::default());
    }
}

/// The assistant's reply as a single-pass stream of text fragments.
///
/// The assistant turn is committed when the stream ends, when the backend
/// reports an error, or when the stream is dropped early. In the last two
/// cases the committed turn holds whatever text arrived so far.
pub struct ReplyStream {
    inner: Option<FragmentStream>,
    turns: Option<OwnedMutexGuard<Vec<ChatMessage>>>,
    text: String,
}

impl ReplyStream {
    fn commit(&mut self) {
        self.inner = None;
        if let Some(mut turns) = self.turns.take() {
            turns.push(ChatMessage::assistant(std::mem::take(&mut self.text)));
        }
    }

    /// Drain the stream and return the full reply text.
    pub async fn into_text(mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(frag) = self.next().await {
            out.push_str(&frag?);
        }
        Ok(out)
    }
}

impl Stream for ReplyStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(frag))) => {
                this.text.push_str(&frag);
                Poll::Ready(Some(Ok(frag)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, "reply stream failed; keeping partial reply");
                this.commit();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.commit();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        if self.turns.is_some() {
            tracing::debug!(chars = self.text.len(), "reply stream dropped early; keeping partial reply");
            self.commit();
        }
    }
}
