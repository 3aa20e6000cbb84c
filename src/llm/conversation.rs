//! Conversation helpers for bot handlers
//!
//! Builds the message list sent to [`super::LlmService`] and keeps long
//! dialogs inside the model's context window.

use super::{Message, Role};

/// System prompt used when a handler does not supply its own
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are MysticBot, a mystical assistant.";
/// Maximum history messages kept after the system prompt
pub const MAX_CONTEXT_MESSAGES: usize = 20;
/// Approximate token budget for the whole conversation
pub const MAX_CONTEXT_TOKENS: usize = 24_000;

/// Rough token estimate: one token per three characters.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 3
}

/// Build `[system, ...history, user]`.
#[must_use]
pub fn build_conversation(
    system_prompt: &str,
    history: &[Message],
    user_message: &str,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend_from_slice(history);
    messages.push(Message::user(user_message));
    messages
}

/// Trim a conversation to fit `max_messages` and `max_tokens`.
///
/// A leading system message is never removed and stays first. The history
/// behind it is cut to the newest `max_messages` entries, then the oldest
/// entries are dropped while the estimate exceeds `max_tokens`, always
/// keeping at least the last two.
#[must_use]
pub fn trim_context(
    mut messages: Vec<Message>,
    max_messages: usize,
    max_tokens: usize,
) -> Vec<Message> {
    let system = if messages.first().is_some_and(|m| m.role == Role::System) {
        Some(messages.remove(0))
    } else {
        None
    };
    let mut history = messages;

    if history.len() > max_messages {
        history.drain(..history.len() - max_messages);
    }

    let mut total_tokens: usize = history.iter().map(|m| estimate_tokens(&m.content)).sum();
    if let Some(system) = &system {
        total_tokens += estimate_tokens(&system.content);
    }

    let mut drop_count = 0;
    while total_tokens > max_tokens && history.len() - drop_count > 2 {
        total_tokens -= estimate_tokens(&history[drop_count].content);
        drop_count += 1;
    }
    history.drain(..drop_count);

    let mut result = Vec::with_capacity(history.len() + 1);
    result.extend(system);
    result.extend(history);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog(turns: usize) -> Vec<Message> {
        (0..turns)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(&format!("question {i}"))
                } else {
                    Message::assistant(&format!("answer {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn test_build_conversation_order() {
        let messages = build_conversation("You are X", &dialog(2), "hi");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], Message::system("You are X"));
        assert_eq!(messages[3], Message::user("hi"));
    }

    #[test]
    fn test_trim_by_count_keeps_system_first() {
        let mut messages = vec![Message::system("rules")];
        messages.extend(dialog(30));

        let trimmed = trim_context(messages, MAX_CONTEXT_MESSAGES, MAX_CONTEXT_TOKENS);

        assert_eq!(trimmed.len(), MAX_CONTEXT_MESSAGES + 1);
        assert_eq!(trimmed[0].role, Role::System);
        assert_eq!(trimmed[1].content, "question 10");
        assert_eq!(trimmed[MAX_CONTEXT_MESSAGES].content, "answer 29");
    }

    #[test]
    fn test_trim_by_tokens_keeps_last_two() {
        let big = "x".repeat(3_000);
        let messages = vec![
            Message::system("rules"),
            Message::user(&big),
            Message::assistant(&big),
            Message::user(&big),
            Message::assistant("short"),
        ];

        let trimmed = trim_context(messages, 20, 100);

        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed[0].role, Role::System);
        assert_eq!(trimmed[2].content, "short");
    }

    #[test]
    fn test_trim_without_system() {
        let trimmed = trim_context(dialog(5), 3, MAX_CONTEXT_TOKENS);
        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed[0].content, "question 2");
    }

    #[test]
    fn test_trim_empty() {
        assert!(trim_context(Vec::new(), 20, 100).is_empty());
    }
}
