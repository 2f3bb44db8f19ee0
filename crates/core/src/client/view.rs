/// Where a turn renders its messages.
pub trait ConversationView: Send {
    fn push_user_message(&mut self, text: &str);

    /// Adds the empty "assistant is typing" slot for the current turn.
    fn open_assistant_message(&mut self);

    /// Replaces the text of the open assistant slot.
    fn update_assistant_message(&mut self, text: &str);

    /// Adds a standalone assistant message (errors, notices).
    fn push_assistant_message(&mut self, text: &str);

    /// Replaces the live "being heard" text while speech is captured. An
    /// empty string clears it.
    fn show_transcript(&mut self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

/// In-memory message list.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    open_slot: Option<usize>,
    heard: String,
}

impl Transcript {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn heard(&self) -> &str {
        &self.heard
    }

    fn push(&mut self, role: Role, text: &str) {
        self.messages.push(Message {
            role,
            text: text.to_string(),
        });
    }
}

impl ConversationView for Transcript {
    fn push_user_message(&mut self, text: &str) {
        self.open_slot = None;
        self.push(Role::User, text);
    }

    fn open_assistant_message(&mut self) {
        self.push(Role::Assistant, "");
        self.open_slot = Some(self.messages.len() - 1);
    }

    fn update_assistant_message(&mut self, text: &str) {
        if self.open_slot.is_none() {
            self.open_assistant_message();
        }
        if let Some(i) = self.open_slot {
            self.messages[i].text = text.to_string();
        }
    }

    fn push_assistant_message(&mut self, text: &str) {
        self.push(Role::Assistant, text);
    }

    fn show_transcript(&mut self, text: &str) {
        self.heard = text.to_string();
    }
}
