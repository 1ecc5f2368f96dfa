//! System prompt construction for standard and research turns.

use asky_llm::{ChatMessage, Role};

pub fn construct_system_prompt() -> String {
    concat!(
        "You are asky, a research assistant. Answer the user's question ",
        "accurately and concisely. Use the available tools when the answer ",
        "requires current information or content from specific pages. Cite ",
        "source URLs for claims drawn from fetched content."
    )
    .to_string()
}

pub fn construct_research_system_prompt() -> String {
    concat!(
        "You are asky in research mode. Work iteratively: discover candidate ",
        "sources, read the most promising ones, extract the facts that answer ",
        "the question, and persist important findings. Prefer targeted ",
        "retrieval over full-page reads. Always cite the source URL for each ",
        "claim, and say so explicitly when sources conflict or evidence is thin."
    )
    .to_string()
}

/// Append research guidance lines reflecting the turn's corpus state.
pub fn append_research_guidance(
    system_prompt: String,
    corpus_preloaded: bool,
    local_kb_hint_enabled: bool,
    section_tools_enabled: bool,
) -> String {
    let mut prompt = system_prompt;
    if corpus_preloaded {
        prompt.push_str(
            "\n\nA corpus of sources was preloaded before this conversation. \
             Query it with get_relevant_content before fetching anything new.",
        );
    }
    if local_kb_hint_enabled {
        prompt.push_str(
            "\n\nLocal knowledge-base documents are available through \
             corpus://cache/<id> handles. Never guess filesystem paths; use the \
             handles provided in the context.",
        );
    }
    if section_tools_enabled {
        prompt.push_str(
            "\n\nFor local corpus sources, call list_sections first to discover \
             section titles, then summarize_section for deep section summaries.",
        );
    }
    prompt
}

/// Append enabled tool guidelines to the leading system message. No-op
/// when there are no guidelines or no leading system message.
pub fn append_tool_guidelines(messages: &mut [ChatMessage], guidelines: &[String]) {
    if guidelines.is_empty() {
        return;
    }
    let Some(first) = messages.first_mut() else {
        return;
    };
    if first.role != Role::System {
        return;
    }
    let mut block = String::from("\n\nEnabled Tool Guidelines:");
    for guideline in guidelines {
        block.push_str("\n- ");
        block.push_str(guideline);
    }
    first.content.push_str(&block);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guidelines_append_to_system_message_only() {
        let mut messages = vec![ChatMessage::system("base"), ChatMessage::user("q")];
        append_tool_guidelines(&mut messages, &["one".to_string(), "two".to_string()]);
        assert!(messages[0].content.contains("Enabled Tool Guidelines:"));
        assert!(messages[0].content.contains("- one"));
        assert!(messages[0].content.contains("- two"));
        assert_eq!(messages[1].content, "q");
    }

    #[test]
    fn no_guidelines_leaves_prompt_untouched() {
        let mut messages = vec![ChatMessage::system("base")];
        append_tool_guidelines(&mut messages, &[]);
        assert_eq!(messages[0].content, "base");
    }

    #[test]
    fn non_system_leading_message_is_ignored() {
        let mut messages = vec![ChatMessage::user("q")];
        append_tool_guidelines(&mut messages, &["one".to_string()]);
        assert_eq!(messages[0].content, "q");
    }
}
