//! Prompt text for chat replies and image planning.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use folio_core::defaults::{FINAL_PROMPT_MARKER, IMAGE_OMITTED};

use crate::context::NotebookContext;

static DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=]+")
        .expect("data URI pattern is valid")
});

/// Replace inline base64 images with a placeholder.
pub fn strip_data_uris(text: &str) -> Cow<'_, str> {
    DATA_URI.replace_all(text, IMAGE_OMITTED)
}

/// System prompt for a text turn.
pub fn chat_system_prompt(context: Option<&NotebookContext>) -> String {
    let mut prompt = String::from(
        "You are a research assistant helping the user understand the material in their \
         notebook. Answer from the provided context when it is relevant and say so when \
         the context does not cover the question. Cite sources by title.",
    );

    let Some(context) = context.filter(|c| !c.is_empty()) else {
        return prompt;
    };

    prompt.push_str("\n\n# CONTEXT\n");
    for source in &context.sources {
        let title = source.title.as_deref().unwrap_or(&source.id);
        prompt.push_str(&format!("\n## Source: {}\n", title));
        if let Some(text) = source.full_text.as_deref().filter(|t| !t.is_empty()) {
            prompt.push_str(text);
            prompt.push('\n');
        }
        for insight in &source.insights {
            prompt.push_str(&format!("- {}: {}\n", insight.insight_type, insight.content));
        }
    }
    for note in &context.notes {
        let title = note.title.as_deref().unwrap_or("Untitled note");
        prompt.push_str(&format!("\n## Note: {}\n{}\n", title, note.content));
    }
    prompt
}

/// Planner instruction. Keeps every element the user asked for and nothing
/// they did not.
pub fn planner_system_prompt() -> String {
    format!(
        "You plan prompts for an image generator.\n\
         Preserve every element of the user's request literally: subjects, counts, text, \
         colors, composition and style must appear exactly as requested.\n\
         Do not invent characters, events or story details that are not in the request or \
         in the notebook passages provided.\n\
         Describe the plan in short sections (subject, setting, style, lighting, camera).\n\
         End your response with a single line that begins with \"{}\" followed by one \
         paragraph the image model can execute directly.",
        FINAL_PROMPT_MARKER
    )
}

/// User message for the planner.
pub fn planner_human_prompt(user_prompt: &str, context_summary: &str) -> String {
    if context_summary.is_empty() {
        format!(
            "User request:\n{}\n\nProvide the detailed plan plus FINAL PROMPT.",
            user_prompt
        )
    } else {
        format!(
            "User request:\n{}\n\nRelevant notebook passages:\n{}\n\nProvide the detailed plan plus FINAL PROMPT.",
            user_prompt, context_summary
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextNote, ContextSource};

    #[test]
    fn test_strip_data_uris() {
        let text = "look ![img](data:image/png;base64,iVBORw0KGgo=) and data:image/svg+xml;base64,PHN2Zz4=";
        assert_eq!(
            strip_data_uris(text),
            "look ![img]([image omitted]) and [image omitted]"
        );
        assert!(matches!(strip_data_uris("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_chat_prompt_includes_context() {
        let context = NotebookContext {
            sources: vec![ContextSource {
                id: "s1".into(),
                title: Some("Rivers".into()),
                full_text: Some("Rivers carve valleys.".into()),
                insights: vec![],
            }],
            notes: vec![ContextNote {
                id: None,
                title: None,
                content: "Remember deltas.".into(),
            }],
        };
        let prompt = chat_system_prompt(Some(&context));
        assert!(prompt.contains("## Source: Rivers\nRivers carve valleys."));
        assert!(prompt.contains("## Note: Untitled note\nRemember deltas."));
        assert!(!chat_system_prompt(None).contains("# CONTEXT"));
    }

    #[test]
    fn test_planner_prompts() {
        assert!(planner_system_prompt().contains("FINAL PROMPT:"));
        assert_eq!(
            planner_human_prompt("a cat", ""),
            "User request:\na cat\n\nProvide the detailed plan plus FINAL PROMPT."
        );
        assert!(planner_human_prompt("a cat", "[Note] n\nx")
            .contains("Relevant notebook passages:\n[Note] n\nx\n\n"));
    }
}
