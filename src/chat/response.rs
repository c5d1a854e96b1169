//! Typed language model replies
//!
//! The model answers with `{"type": <task>, "content": <payload>}`, where the
//! payload is either plain text or an object. [`TaskContent::normalize`]
//! folds both shapes into one [`Reply`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Task payload from the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskContent {
    Text(String),
    Object(Map<String, Value>),
}

impl TaskContent {
    /// String field of an object payload
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            Self::Object(map) => map.get(name).and_then(Value::as_str),
            Self::Text(_) => None,
        }
    }

    /// Field rendered as text, whatever its JSON type
    #[must_use]
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self {
            Self::Object(map) => map.get(name).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            Self::Text(_) => None,
        }
    }

    /// Fold text and `{question?, answer}` payloads into a [`Reply`]
    ///
    /// # Errors
    ///
    /// Returns `Error::ResponseShape` for objects without a string `answer`
    pub fn normalize(&self) -> Result<Reply> {
        match self {
            Self::Text(text) => Ok(Reply {
                question: None,
                answer: text.clone(),
            }),
            Self::Object(_) => {
                let answer = self.field("answer").ok_or_else(|| {
                    Error::ResponseShape("content has no string 'answer'".to_string())
                })?;
                Ok(Reply {
                    question: self.field("question").map(str::to_string),
                    answer: answer.to_string(),
                })
            }
        }
    }
}

/// A parsed model reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Task that should handle the content
    #[serde(rename = "type")]
    pub kind: String,
    pub content: TaskContent,
}

/// Canonical question/answer form of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub question: Option<String>,
    pub answer: String,
}

impl ChatResponse {
    /// Parse raw model output, tolerating a surrounding code fence
    ///
    /// # Errors
    ///
    /// Returns `Error::ResponseShape` if the output isn't a `{type, content}`
    /// object
    pub fn parse(raw: &str) -> Result<Self> {
        let body = strip_code_fence(raw);
        serde_json::from_str(body).map_err(|e| {
            Error::ResponseShape(format!("expected {{type, content}} object: {e}"))
        })
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content_normalizes() {
        let r = ChatResponse::parse(r#"{"type": "task_new", "content": "A área é 3.14"}"#).unwrap();
        assert_eq!(r.kind, "task_new");
        assert_eq!(
            r.content.normalize().unwrap(),
            Reply {
                question: None,
                answer: "A área é 3.14".to_string()
            }
        );
    }

    #[test]
    fn test_object_content_normalizes() {
        let r = ChatResponse::parse(
            r#"{"type": "handle_normal", "content": {"question": "Junin, tudo bem?", "answer": "Tudo ótimo."}}"#,
        )
        .unwrap();
        let reply = r.content.normalize().unwrap();
        assert_eq!(reply.question.as_deref(), Some("Junin, tudo bem?"));
        assert_eq!(reply.answer, "Tudo ótimo.");
    }

    #[test]
    fn test_object_without_answer_is_shape_error() {
        let r = ChatResponse::parse(
            r#"{"type": "handle_pensamento", "content": {"pensamento": "hmm"}}"#,
        )
        .unwrap();
        assert!(matches!(r.content.normalize(), Err(Error::ResponseShape(_))));
    }

    #[test]
    fn test_unrecognized_shapes_rejected() {
        assert!(matches!(
            ChatResponse::parse("just some words"),
            Err(Error::ResponseShape(_))
        ));
        assert!(matches!(
            ChatResponse::parse(r#"{"type": "handle_normal", "content": 42}"#),
            Err(Error::ResponseShape(_))
        ));
        assert!(ChatResponse::parse(r#"{"content": "no type"}"#).is_err());
    }

    #[test]
    fn test_code_fence_stripped() {
        let raw = "```json\n{\"type\": \"handle_normal\", \"content\": \"oi\"}\n```";
        assert_eq!(ChatResponse::parse(raw).unwrap().kind, "handle_normal");
    }
}
