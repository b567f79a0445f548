use chrono::Local;

use crate::models::{Message, Role};
use crate::store::ChatState;

/// Plain-text rendering of the active thread.
pub fn render_thread(state: &ChatState) -> Vec<String> {
    let Some(conversation) = state.active_conversation() else {
        return vec!["No conversation selected. Use /new to start one.".to_string()];
    };

    let mut lines = vec![format!("== {} ==", conversation.title)];
    if state.messages_loading {
        lines.push("(loading messages...)".to_string());
        return lines;
    }

    if state.messages.is_empty() {
        lines.push("(no messages yet)".to_string());
    }
    lines.extend(state.messages.iter().map(render_message));

    if state.assistant_typing {
        lines.push("assistant is typing...".to_string());
    }
    lines
}

pub fn render_message(message: &Message) -> String {
    let label = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let marker = if message.is_pending() { " (sending)" } else { "" };
    format!(
        "[{}] {}{}: {}",
        message.created_at.with_timezone(&Local).format("%H:%M"),
        label,
        marker,
        message.content
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::Conversation;

    fn state_with(messages: Vec<Message>) -> ChatState {
        let now = Utc::now();
        ChatState {
            conversations: vec![Conversation {
                id: "c1".to_string(),
                user_id: None,
                title: "Kyoto".to_string(),
                created_at: now,
                updated_at: now,
            }],
            active_conversation_id: Some("c1".to_string()),
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_selection() {
        let lines = render_thread(&ChatState::default());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("No conversation selected"));
    }

    #[test]
    fn test_thread_with_typing_indicator() {
        let mut state = state_with(vec![Message::pending("c1", "Plan a trip")]);
        state.assistant_typing = true;

        let lines = render_thread(&state);
        assert_eq!(lines[0], "== Kyoto ==");
        assert!(lines[1].ends_with("you (sending): Plan a trip"));
        assert_eq!(lines.last().unwrap(), "assistant is typing...");
    }

    #[test]
    fn test_message_time_is_local() {
        let message = Message::pending("c1", "Hi");
        let local = message.created_at.with_timezone(&Local).format("%H:%M").to_string();
        assert!(render_message(&message).starts_with(&format!("[{}] you", local)));
    }

    #[test]
    fn test_loading_hides_messages() {
        let mut state = state_with(vec![Message::pending("c1", "hidden")]);
        state.messages_loading = true;
        let lines = render_thread(&state);
        assert_eq!(lines, vec!["== Kyoto ==", "(loading messages...)"]);
    }
}
