use mysticbot::llm::conversation::{estimate_tokens, trim_context};
use mysticbot::llm::{Message, Role};
use proptest::prelude::*;

fn history_strategy() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(
        (proptest::bool::ANY, "[a-zA-Zа-я0-9 ]{0,120}").prop_map(|(from_user, text)| {
            if from_user {
                Message::user(&text)
            } else {
                Message::assistant(&text)
            }
        }),
        0..40,
    )
}

proptest! {
    /// The system prompt survives trimming and stays first.
    #[test]
    fn keeps_system_first(
        history in history_strategy(),
        max_messages in 1usize..30,
        max_tokens in 0usize..500,
    ) {
        let mut messages = vec![Message::system("You are MysticBot")];
        messages.extend(history);

        let trimmed = trim_context(messages, max_messages, max_tokens);

        prop_assert_eq!(&trimmed[0], &Message::system("You are MysticBot"));
        prop_assert!(trimmed.iter().skip(1).all(|m| m.role != Role::System));
        prop_assert!(trimmed.len() <= max_messages + 1);
    }

    /// The result is the newest suffix of the history and never drops the
    /// last two entries for token reasons.
    #[test]
    fn keeps_newest_suffix(
        history in history_strategy(),
        max_messages in 1usize..30,
        max_tokens in 0usize..500,
    ) {
        let trimmed = trim_context(history.clone(), max_messages, max_tokens);

        prop_assert!(history.ends_with(&trimmed));
        prop_assert!(trimmed.len() >= history.len().min(max_messages).min(2));
        if let Some(last) = history.last() {
            prop_assert_eq!(trimmed.last(), Some(last));
        }

        let tokens: usize = trimmed.iter().map(|m| estimate_tokens(&m.content)).sum();
        prop_assert!(tokens <= max_tokens || trimmed.len() <= 2);
    }
}
