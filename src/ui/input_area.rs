use crate::store::ChatState;

/// Message composer. Holds the draft until it is submitted.
#[derive(Debug, Clone, Default)]
pub struct InputArea {
    draft: String,
}

impl InputArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_text(&mut self, text: &str) {
        self.draft = text.to_string();
    }

    pub fn text(&self) -> &str {
        &self.draft
    }

    pub fn can_send(&self, state: &ChatState) -> bool {
        !self.draft.trim().is_empty()
            && !state.assistant_typing
            && state.active_conversation_id.is_some()
    }

    pub fn placeholder(state: &ChatState) -> &'static str {
        if state.active_conversation_id.is_some() {
            "Message the assistant..."
        } else {
            "Start a new chat to begin"
        }
    }

    /// Take the trimmed draft for sending, clearing the composer.
    pub fn submit(&mut self, state: &ChatState) -> Option<String> {
        if !self.can_send(state) {
            return None;
        }
        let text = self.draft.trim().to_string();
        self.draft.clear();
        Some(text)
    }
}
