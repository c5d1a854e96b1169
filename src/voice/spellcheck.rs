//! Transcript term correction
//!
//! Speech recognition mangles names and jargon. [`SpellcheckTranscriber`]
//! wraps another [`Transcriber`] and has a language model rewrite each
//! transcript against a list of known terms.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::stt::Transcriber;
use crate::Result;
use crate::chat::{ChatMessage, LanguageModel, Role};

/// Transcriber that corrects the inner transcript against known terms
pub struct SpellcheckTranscriber {
    inner: Arc<dyn Transcriber>,
    model: Arc<dyn LanguageModel>,
    terms: Vec<String>,
}

impl SpellcheckTranscriber {
    #[must_use]
    pub fn new(inner: Arc<dyn Transcriber>, model: Arc<dyn LanguageModel>, terms: Vec<String>) -> Self {
        Self {
            inner,
            model,
            terms,
        }
    }

    /// Instructions sent ahead of the transcript
    fn system_prompt(&self) -> String {
        let mut prompt = "Correct the text using the list of terms as reference. \
Return only the corrected text, without explanations."
            .to_string();
        if !self.terms.is_empty() {
            prompt.push_str("\n\nCorrect terms: ");
            prompt.push_str(&self.terms.join(", "));
        }
        prompt
    }

    /// Corrected `text`, or `text` unchanged if the model fails or answers
    /// with nothing
    async fn correct(&self, text: &str) -> String {
        let messages = [
            ChatMessage::new(Role::System, self.system_prompt()),
            ChatMessage::new(Role::User, text),
        ];
        match self.model.complete(&messages).await {
            Ok(corrected) if !corrected.trim().is_empty() => {
                let corrected = corrected.trim().to_string();
                tracing::debug!(original = %text, corrected = %corrected, "transcript corrected");
                corrected
            }
            Ok(_) => {
                tracing::warn!("spelling correction returned nothing, keeping transcript");
                text.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "spelling correction failed, keeping transcript");
                text.to_string()
            }
        }
    }
}

#[async_trait]
impl Transcriber for SpellcheckTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        let text = self.inner.transcribe(wav).await?;
        if text.trim().is_empty() {
            return Ok(text);
        }
        Ok(self.correct(&text).await)
    }
}

/// One term per line; blank lines are skipped and stray commas trimmed
fn parse_terms(list: &str) -> Vec<String> {
    list.lines()
        .map(|line| line.trim().trim_matches(',').trim())
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the term list at `path`; a missing or unreadable file yields none
#[must_use]
pub fn load_terms(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(list) => {
            let terms = parse_terms(&list);
            tracing::info!(path = %path.display(), terms = terms.len(), "spelling terms loaded");
            terms
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "spelling terms unavailable");
            Vec::new()
        }
    }
}
