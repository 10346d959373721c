//! Model-backed pipeline stages: the search decision and query synthesis.

use crate::{ChatBackend, ChatMessage, Error, Result};

/// Prefix put in front of the utterance when asking for a search query.
pub const QUERY_PROMPT_PREFIX: &str = "CREATE AN INTERNET SEARCH QUERY FOR THIS PROMPT: \n";

/// True iff the classifier output mentions "true", case-insensitively.
///
/// Everything else, including "false", empty or rambling output, is a no.
pub fn is_affirmative(raw: &str) -> bool {
    raw.to_lowercase().contains("true")
}

/// Strip double quotes (ASCII and typographic) and surrounding whitespace.
pub fn normalize_query(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '"' | '\u{201c}' | '\u{201d}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Ask the classifier whether `utterance` needs fresh web context.
pub async fn decide_to_search(
    backend: &dyn ChatBackend,
    instruction: &str,
    utterance: &str,
) -> Result<bool> {
    tracing::info!("decide_to_search: assessing whether web search is necessary");
    let messages = [ChatMessage::system(instruction), ChatMessage::user(utterance)];
    let reply = backend
        .chat(&messages)
        .await
        .map_err(|e| Error::ClassifierUnavailable(e.to_string()))?;
    let needed = is_affirmative(&reply.content);
    tracing::info!(needed, "decide_to_search: done");
    tracing::debug!(raw = %reply.content, "decide_to_search: classifier output");
    Ok(needed)
}

/// Turn `utterance` into a short search-engine query.
///
/// The result is not validated; it may be empty.
pub async fn generate_query(
    backend: &dyn ChatBackend,
    instruction: &str,
    utterance: &str,
) -> Result<String> {
    let messages = [
        ChatMessage::system(instruction),
        ChatMessage::user(format!("{QUERY_PROMPT_PREFIX}{utterance}")),
    ];
    let reply = backend
        .chat(&messages)
        .await
        .map_err(|e| Error::QueryGenerationFailed(e.to_string()))?;
    let query = normalize_query(&reply.content);
    tracing::info!(%query, "generate_query: done");
    Ok(query)
}
