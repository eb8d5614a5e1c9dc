//! Conversation context for the language model
//!
//! Only used when `orchestrator.conversation_context` is enabled. Keeps the
//! last few user/assistant turns in memory for the life of the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message in the conversation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant response
    Assistant,
}

impl MessageRole {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single message in the conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Bounded history of completed exchanges
#[derive(Clone, Debug)]
pub struct ConversationContext {
    messages: Vec<ConversationMessage>,
    max_turns: usize,
}

impl ConversationContext {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// Remember one completed exchange, dropping the oldest beyond the limit
    pub fn record_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.messages.push(ConversationMessage::user(user));
        self.messages.push(ConversationMessage::assistant(assistant));
        self.trim_to_fit();
    }

    /// Prior turns rendered as plain text, `None` when there are none
    pub fn render(&self) -> Option<String> {
        if self.messages.is_empty() {
            return None;
        }

        let lines: Vec<String> = self
            .messages
            .iter()
            .map(|m| match m.role {
                MessageRole::User => format!("User: {}", m.content),
                MessageRole::Assistant => format!("Coach: {}", m.content),
                MessageRole::System => m.content.clone(),
            })
            .collect();
        Some(lines.join("\n"))
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn turn_count(&self) -> usize {
        self.messages.len() / 2
    }

    /// Get the last user message
    pub fn last_user_message(&self) -> Option<&ConversationMessage> {
        self.messages.iter().rev().find(|m| m.role == MessageRole::User)
    }

    /// Clear conversation history
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn trim_to_fit(&mut self) {
        let max_messages = self.max_turns * 2;
        if self.messages.len() > max_messages {
            let excess = self.messages.len() - max_messages;
            self.messages.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_context_renders_nothing() {
        let ctx = ConversationContext::new(4);
        assert!(ctx.render().is_none());
        assert_eq!(ctx.turn_count(), 0);
    }

    #[test]
    fn test_render_turns() {
        let mut ctx = ConversationContext::new(4);
        ctx.record_turn("how do I lead a team", "Listen first, then decide");

        assert_eq!(
            ctx.render().unwrap(),
            "User: how do I lead a team\nCoach: Listen first, then decide"
        );
        assert_eq!(ctx.last_user_message().unwrap().content, "how do I lead a team");
    }

    #[test]
    fn test_turn_limit() {
        let mut ctx = ConversationContext::new(2);
        for i in 0..5 {
            ctx.record_turn(format!("question {}", i), format!("answer {}", i));
        }

        assert_eq!(ctx.turn_count(), 2);
        assert_eq!(ctx.history()[0].content, "question 3");
    }

    #[test]
    fn test_clear() {
        let mut ctx = ConversationContext::new(2);
        ctx.record_turn("a", "b");
        ctx.clear();
        assert_eq!(ctx.turn_count(), 0);
    }

    #[test]
    fn test_message_serialization() {
        let json = serde_json::to_string(&ConversationMessage::user("Hello")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"Hello"}"#);
    }
}
