//! Markdown transcript of the conversation.

use pollchat_core::{Message, Role};

const USER_HEADING: &str = "# ⊙ You\n\n";
const ASSISTANT_HEADING: &str = "\n\n# ⊚ Assistant\n\n";
const INTERRUPTED: &str = "[Answer Interrupted]\n\n";

/// Render `messages` as markdown.
///
/// A user turn with no answer after it is marked interrupted. When
/// `ignore_last_interrupted` is set the final user turn is left unmarked,
/// because its answer is still streaming.
#[must_use]
pub fn markdown_chat(messages: &[Message], ignore_last_interrupted: bool) -> String {
    let mut out = String::new();
    for (i, message) in messages.iter().enumerate() {
        match message.role {
            Role::Assistant => {
                if !message.content.is_empty() {
                    out.push_str(&message.content);
                    out.push_str("\n\n");
                }
            }
            Role::User => {
                out.push_str(USER_HEADING);
                out.push_str(&message.content);
                out.push_str(ASSISTANT_HEADING);
                let next_is_user = messages.get(i + 1).is_some_and(|m| m.role == Role::User);
                let last = i + 1 == messages.len();
                if next_is_user || (last && !ignore_last_interrupted) {
                    out.push_str(INTERRUPTED);
                }
            }
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_conversation() {
        assert_eq!(markdown_chat(&[], false), "");
    }

    #[test]
    fn test_answered_turn() {
        let chat = [Message::user("hello"), Message::assistant("Hi there.")];
        assert_eq!(
            markdown_chat(&chat, false),
            "# ⊙ You\n\nhello\n\n# ⊚ Assistant\n\nHi there."
        );
    }

    #[test]
    fn test_unanswered_turns_marked_interrupted() {
        let chat = [Message::user("one"), Message::user("two")];
        assert_eq!(
            markdown_chat(&chat, false),
            "# ⊙ You\n\none\n\n# ⊚ Assistant\n\n[Answer Interrupted]\n\n\
             # ⊙ You\n\ntwo\n\n# ⊚ Assistant\n\n[Answer Interrupted]"
        );
    }

    #[test]
    fn test_streaming_turn_not_marked() {
        let chat = [Message::user("one"), Message::user("two")];
        let rendered = markdown_chat(&chat, true);
        assert_eq!(rendered.matches("[Answer Interrupted]").count(), 1);
        assert!(rendered.ends_with("# ⊚ Assistant"));
    }

    #[test]
    fn test_empty_assistant_message_skipped() {
        let chat = [Message::user("q"), Message::assistant(""), Message::user("again")];
        let rendered = markdown_chat(&chat, true);
        assert!(!rendered.contains("[Answer Interrupted]"));
        assert!(rendered.contains("# ⊚ Assistant\n\n# ⊙ You\n\nagain"));
    }
}
