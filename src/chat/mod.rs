//! Language model conversation

mod openai;
mod response;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiChat;
pub use response::{ChatResponse, Reply, TaskContent};

use crate::Result;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Produces the raw reply to a conversation
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `messages`, returning the model's raw text
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Conversation history seeded with the system prompt
#[derive(Debug, Clone)]
pub struct Conversation {
    system_prompt: String,
    messages: Vec<ChatMessage>,
}

impl Conversation {
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            messages: vec![ChatMessage::new(Role::System, system_prompt.clone())],
            system_prompt,
        }
    }

    /// History including the system prompt
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Drop everything but the system prompt
    pub fn clear(&mut self) {
        self.messages = vec![ChatMessage::new(Role::System, self.system_prompt.clone())];
    }

    /// Ask `model` about `user_text` without changing the history
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the reply has the wrong shape
    pub async fn ask(&self, model: &dyn LanguageModel, user_text: &str) -> Result<ChatResponse> {
        let mut messages = self.messages.clone();
        messages.push(ChatMessage::new(Role::User, user_text));
        let raw = model.complete(&messages).await?;
        ChatResponse::parse(&raw)
    }

    /// Append a completed exchange
    pub fn record(&mut self, user_text: &str, reply: &str) {
        self.messages.push(ChatMessage::new(Role::User, user_text));
        self.messages.push(ChatMessage::new(Role::Assistant, reply));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Canned {
        reply: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl LanguageModel for Canned {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            *self.seen.lock().unwrap() = messages.to_vec();
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_ask_sends_history_and_user_text() {
        let model = Canned {
            reply: r#"{"type": "handle_normal", "content": {"question": "q", "answer": "a"}}"#
                .to_string(),
            seen: Mutex::new(Vec::new()),
        };
        let mut conversation = Conversation::new("system");
        conversation.record("earlier", "reply");

        let response = conversation.ask(&model, "Junin, que horas são?").await.unwrap();
        assert_eq!(response.kind, "handle_normal");

        let seen = model.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], ChatMessage::new(Role::System, "system"));
        assert_eq!(seen[3], ChatMessage::new(Role::User, "Junin, que horas são?"));
        assert_eq!(conversation.messages().len(), 3);
    }

    #[test]
    fn test_clear_keeps_system_prompt() {
        let mut conversation = Conversation::new("system");
        conversation.record("u", "a");
        conversation.clear();
        assert_eq!(conversation.messages(), &[ChatMessage::new(Role::System, "system")]);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::new(Role::Assistant, "x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
    }
}
