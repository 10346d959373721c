use crate::ScrapedContext;
use serde::{Deserialize, Serialize};

/// Marker placed in front of the user's own words, after all injected context.
pub const USER_PROMPT_TAG: &str = "USER PROMPT: ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedQuery {
    pub text: String,
    /// Parallel to the context blocks in `text`.
    pub source_urls: Vec<String>,
}

/// Build the augmented prompt: preamble, one numbered block per context in
/// retrieval order, then the untouched utterance as the final segment.
pub fn assemble(preamble: &str, contexts: &[ScrapedContext], utterance: &str) -> AugmentedQuery {
    let mut text = String::new();
    text.push_str(preamble);
    text.push_str("\n\n");
    let mut source_urls = Vec::with_capacity(contexts.len());
    for (i, c) in contexts.iter().enumerate() {
        source_urls.push(c.url.clone());
        text.push_str(&format!("SEARCH RESULT #{}:\n", i + 1));
        text.push_str(&format!("NAME: {}\n", c.name));
        text.push_str(&c.text);
        text.push_str("\n\n");
    }
    text.push_str(USER_PROMPT_TAG);
    text.push_str(utterance);
    AugmentedQuery { text, source_urls }
}
