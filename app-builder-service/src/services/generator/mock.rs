//! Mock provider for tests.

use super::{Completion, GenerationParams, GeneratorError, TextProvider};
use async_trait::async_trait;
use std::sync::Mutex;

/// Replies with a fixed completion and records every prompt it receives.
pub struct MockTextProvider {
    reply: String,
    fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl MockTextProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Provider whose every call fails with a non-retryable API error.
    pub fn failing() -> Self {
        Self {
            reply: String::new(),
            fail: true,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextProvider for MockTextProvider {
    async fn complete(
        &self,
        _system: &str,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<Completion, GeneratorError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if self.fail {
            return Err(GeneratorError::Api("mock provider failure".to_string()));
        }

        Ok(Completion {
            text: self.reply.clone(),
            input_tokens: (prompt.len() / 4) as u32,
            output_tokens: (self.reply.len() / 4) as u32,
        })
    }

    async fn health_check(&self) -> Result<(), GeneratorError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
