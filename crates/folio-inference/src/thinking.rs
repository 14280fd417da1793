//! Separation of `<think>...</think>` reasoning blocks from model answers.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// A model response split into reasoning and answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingResponse {
    pub thinking_content: Option<String>,
    pub answer_content: String,
}

/// Split explicit `<think>` blocks out of `response`.
///
/// An unclosed block swallows the rest of the response. A stray closing tag
/// with no opener (some models omit the opening tag) ends the reasoning part.
///
/// ```
/// use folio_inference::thinking::parse_thinking_response;
///
/// let parsed = parse_thinking_response("<think>Analyzing...</think>The answer is 42.");
/// assert_eq!(parsed.thinking_content.as_deref(), Some("Analyzing..."));
/// assert_eq!(parsed.answer_content, "The answer is 42.");
/// ```
pub fn parse_thinking_response(response: &str) -> ThinkingResponse {
    let mut thinking = String::new();
    let mut answer = String::new();
    let mut rest = response;

    if !rest.contains(OPEN_TAG) {
        if let Some(end) = rest.find(CLOSE_TAG) {
            thinking.push_str(&rest[..end]);
            rest = &rest[end + CLOSE_TAG.len()..];
        }
    }

    while let Some(start) = rest.find(OPEN_TAG) {
        answer.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN_TAG.len()..];
        if !thinking.is_empty() {
            thinking.push('\n');
        }
        match after_open.find(CLOSE_TAG) {
            Some(end) => {
                thinking.push_str(&after_open[..end]);
                rest = &after_open[end + CLOSE_TAG.len()..];
            }
            None => {
                thinking.push_str(after_open);
                rest = "";
            }
        }
    }
    answer.push_str(rest);

    let thinking = thinking.trim();
    ThinkingResponse {
        thinking_content: (!thinking.is_empty()).then(|| thinking.to_string()),
        answer_content: answer.trim().to_string(),
    }
}

/// The answer part of a response with every reasoning block removed.
pub fn strip_thinking(response: &str) -> String {
    parse_thinking_response(response).answer_content
}
