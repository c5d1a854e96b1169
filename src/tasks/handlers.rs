//! Built-in tasks

use super::TaskHandler;
use crate::chat::TaskContent;
use crate::{Error, Result};

/// Plain conversation: speak the model's answer
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalTask;

impl TaskHandler for NormalTask {
    fn name(&self) -> &str {
        "handle_normal"
    }

    fn description(&self) -> &str {
        "Replies only when someone talks to Junin."
    }

    fn trigger(&self) -> &str {
        "Only when someone addresses Junin by name, the type is 'handle_normal'."
    }

    fn example(&self) -> &str {
        r#"{"type": "handle_normal", "content": {"question": "the user's original text", "answer": "the answer for the user"}}"#
    }

    fn execute(&self, content: &TaskContent) -> Result<String> {
        Ok(content.normalize()?.answer)
    }
}

/// Overheard speech not addressed to the assistant
#[derive(Debug, Clone, Copy, Default)]
pub struct ThoughtTask;

impl TaskHandler for ThoughtTask {
    fn name(&self) -> &str {
        "handle_pensamento"
    }

    fn description(&self) -> &str {
        "Talking about something."
    }

    fn trigger(&self) -> &str {
        "When you read something without your name, the type is 'handle_pensamento'."
    }

    fn example(&self) -> &str {
        r#"{"type": "handle_pensamento", "content": {"pensamento": "your thoughts about what was said"}}"#
    }

    fn execute(&self, content: &TaskContent) -> Result<String> {
        let thought = match content {
            TaskContent::Text(text) => text.as_str(),
            TaskContent::Object(_) => content
                .field("pensamento")
                .ok_or_else(|| Error::Task("content has no 'pensamento'".to_string()))?,
        };
        Ok(format!("Pensamento: {thought}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: serde_json::Value) -> TaskContent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_normal_accepts_text_and_object() {
        assert_eq!(
            NormalTask.execute(&TaskContent::Text("olá".to_string())).unwrap(),
            "olá"
        );
        assert_eq!(
            NormalTask
                .execute(&object(json!({"question": "q", "answer": "a"})))
                .unwrap(),
            "a"
        );
        assert!(matches!(
            NormalTask.execute(&object(json!({"question": "q"}))),
            Err(Error::ResponseShape(_))
        ));
    }

    #[test]
    fn test_thought_prefix() {
        assert_eq!(
            ThoughtTask
                .execute(&object(json!({"pensamento": "interessante"})))
                .unwrap(),
            "Pensamento: interessante"
        );
    }
}
