use crate::search::PageContext;

/// Assemble the generation prompt: the question, one line per retrieved
/// source, then the configured instruction template.
pub fn build_prompt(question: &str, contexts: &[PageContext], instruction: &str) -> String {
    let mut lines = vec![format!("question: {question}"), "sources:".to_string()];
    for context in contexts {
        lines.push(format!(
            "  - source: {}, content: {}",
            context.url, context.text
        ));
    }
    lines.push(instruction.to_string());
    lines.join("\n")
}
