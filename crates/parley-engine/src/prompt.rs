//! Prompt templates for summarization and history injection

/// Persona used when the server config does not provide one
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful assistant. Answer clearly and accurately, and say so when you \
do not know something.";

/// Content of the system marker written when memory is cleared
pub const RESET_MARKER: &str = "The following is a new conversation";

/// Content of the system block appended when a user stops a generation
pub const STOP_MARKER: &str = "generation stopped by user";

const SUMMARY_PROMPT: &str = "\
Combine the current summary with the new lines of conversation and return a new \
summary. Output only the summary itself, without any descriptive preamble, and keep \
it under 500 words.

>>> EXAMPLE
Current summary:
The human asks what the AI thinks of artificial intelligence. The AI thinks artificial \
intelligence is a force for good.

New lines of conversation:
Human: Why do you think artificial intelligence is a force for good?
AI: Because artificial intelligence will help humans reach their full potential.

New summary:
The human asks what the AI thinks of artificial intelligence and why it is a force for \
good. The AI believes it is a force for good because it will help humans reach their \
full potential.
<<< END OF EXAMPLE

Current summary:
{summary}

New lines of conversation:
{new_lines}

New summary:
";

const SUMMARY_HISTORY_PROMPT: &str = "\
The following is a summary of a friendly conversation between a human and an AI. \
The AI is talkative and provides lots of specific details from its context. If the \
AI does not know the answer to a question, it truthfully says it does not know.

Current conversation summary:
{history}
";

/// Render the prompt asking the model to fold `new_lines` into `summary`
pub fn summary_prompt(summary: &str, new_lines: &str) -> String {
    SUMMARY_PROMPT
        .replace("{summary}", summary)
        .replace("{new_lines}", new_lines)
}

/// Render the system section that injects an existing summary
pub fn summary_history_prompt(summary: &str) -> String {
    SUMMARY_HISTORY_PROMPT.replace("{history}", summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_prompt_fills_placeholders() {
        let prompt = summary_prompt("old facts", "Human: hi\nAI: hello");
        assert!(prompt.contains("Current summary:\nold facts\n"));
        assert!(prompt.contains("New lines of conversation:\nHuman: hi\nAI: hello\n"));
        assert!(!prompt.contains("{summary}"));
        assert!(!prompt.contains("{new_lines}"));
        assert!(prompt.trim_end().ends_with("New summary:"));
    }

    #[test]
    fn test_history_prompt() {
        let prompt = summary_history_prompt("they talked about rust");
        assert!(prompt.ends_with("they talked about rust\n"));
    }
}
