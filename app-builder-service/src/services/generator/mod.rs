//! LLM-backed generation of single-page apps.
//!
//! `TextProvider` is the seam to the model vendor; `AppGenerator` owns the
//! prompt, retries and response parsing so every provider behaves alike.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use service_core::retry::{retry_async, RetryConfig, Retryable};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::services::attachments::ProcessedAttachment;

pub use mock::MockTextProvider;
pub use openai::{OpenAiCompatibleProvider, OpenAiConfig};

pub const INDEX_HTML: &str = "index.html";
pub const README_MD: &str = "README.md";

/// Characters of each text attachment quoted into the prompt.
const ATTACHMENT_PREVIEW_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "You are a code generator. You write complete, self-contained \
single-page web applications as one HTML file and reply with that file only.";

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model returned no content")]
    EmptyResponse,
}

impl Retryable for GeneratorError {
    fn is_retryable(&self) -> bool {
        matches!(self, GeneratorError::RateLimited | GeneratorError::Network(_))
    }
}

/// Sampling parameters sent with every completion.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// Raw model output.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Trait for chat-completion providers.
#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Completion, GeneratorError>;

    async fn health_check(&self) -> Result<(), GeneratorError>;

    /// Short provider label for logs and metrics.
    fn name(&self) -> &'static str;
}

/// Everything the model needs to write (or rewrite) an app.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub brief: String,
    pub checks: Vec<String>,
    pub round: u32,
    pub attachments: Vec<ProcessedAttachment>,
    /// Currently deployed `index.html`, for revision rounds.
    pub previous_html: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedApp {
    pub html: String,
    pub readme: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl GeneratedApp {
    pub fn into_files(self) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        files.insert(INDEX_HTML.to_string(), self.html);
        files.insert(README_MD.to_string(), self.readme);
        files
    }
}

pub struct AppGenerator {
    provider: Arc<dyn TextProvider>,
    params: GenerationParams,
    retry: RetryConfig,
}

impl AppGenerator {
    pub fn new(provider: Arc<dyn TextProvider>, params: GenerationParams) -> Self {
        Self {
            provider,
            params,
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_secs(2),
                max_backoff: Duration::from_secs(15),
                backoff_multiplier: 2.0,
                add_jitter: true,
            },
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> &Arc<dyn TextProvider> {
        &self.provider
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedApp, GeneratorError> {
        let prompt = build_prompt(request);

        tracing::debug!(
            provider = self.provider.name(),
            model = %self.params.model,
            prompt_len = prompt.len(),
            round = request.round,
            "Requesting app generation"
        );

        let completion = retry_async(&self.retry, "llm_generate", || {
            self.provider.complete(SYSTEM_PROMPT, &prompt, &self.params)
        })
        .await?;

        let html = extract_html(&completion.text);
        if html.is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }
        if !html.to_ascii_lowercase().contains("<html") {
            tracing::warn!(
                round = request.round,
                "Generated output does not look like an HTML document"
            );
        }

        Ok(GeneratedApp {
            html,
            readme: render_readme(&request.brief, &request.checks, request.round),
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
        })
    }
}

pub fn build_prompt(request: &GenerationRequest) -> String {
    let checks = if request.checks.is_empty() {
        "- (none provided)".to_string()
    } else {
        request
            .checks
            .iter()
            .map(|check| format!("- {}", check))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let attachments = if request.attachments.is_empty() {
        "- (none)".to_string()
    } else {
        request
            .attachments
            .iter()
            .map(describe_attachment)
            .collect::<Vec<_>>()
            .join("\n")
    };

    let revision = match (&request.previous_html, request.round) {
        (Some(previous), round) if round > 1 => format!(
            "\n**Revision (round {round}):** This app is already deployed. Update it so it \
             satisfies the brief and checks above while keeping features that still apply. \
             The current index.html is:\n```html\n{previous}\n```\nReturn the complete updated file.\n"
        ),
        (None, round) if round > 1 => format!(
            "\n**Revision (round {round}):** The app is already deployed but its current source \
             is unavailable. Produce a complete replacement that satisfies the brief and checks.\n"
        ),
        _ => String::new(),
    };

    format!(
        "Create a complete, single-page web application.

**Brief:** {brief}

**Checks to pass:**
{checks}

**Attachments:**
{attachments}
{revision}
**Requirements:**
- Generate complete HTML with embedded CSS and JavaScript
- Use CDN links for any libraries (Bootstrap, marked, highlight.js, etc.)
- Make it functional and production-ready
- Include all necessary error handling
- The app should work immediately when opened in a browser

Return ONLY valid HTML code, nothing else. Start with <!DOCTYPE html>",
        brief = request.brief,
    )
}

fn describe_attachment(attachment: &ProcessedAttachment) -> String {
    let mime = if attachment.mime_type.is_empty() {
        "unknown type"
    } else {
        attachment.mime_type.as_str()
    };
    let mut line = format!("- {} ({}, {} bytes)", attachment.name, mime, attachment.size);
    if let Some(text) = &attachment.text {
        let preview: String = text.chars().take(ATTACHMENT_PREVIEW_CHARS).collect();
        let truncated = if preview.len() < text.len() {
            "\n  [truncated]"
        } else {
            ""
        };
        line.push_str(&format!("\n  ```\n{}\n  ```{}", preview, truncated));
    }
    line
}

/// Pull the HTML document out of a model reply: the first ```html fence,
/// else the first generic fence, else the whole reply.
pub fn extract_html(response: &str) -> String {
    if let Some(start) = response.find("```html") {
        let body = &response[start + "```html".len()..];
        let end = body.find("```").unwrap_or(body.len());
        return body[..end].trim().to_string();
    }

    if let Some(start) = response.find("```") {
        let body = &response[start + 3..];
        let end = body.find("```").unwrap_or(body.len());
        let block = &body[..end];
        // Drop a language tag such as "HTML" or "xml" on the fence line
        let block = match block.split_once('\n') {
            Some((tag, rest))
                if !tag.trim().is_empty()
                    && !tag.trim_start().starts_with('<')
                    && !tag.trim().contains(char::is_whitespace) =>
            {
                rest
            }
            _ => block,
        };
        return block.trim().to_string();
    }

    response.trim().to_string()
}

pub fn render_readme(brief: &str, checks: &[String], round: u32) -> String {
    let checks = if checks.is_empty() {
        "- No explicit checks were provided.".to_string()
    } else {
        checks
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "# Generated Application

## Summary
This application was generated automatically from the following brief:

> {brief}

Current revision: round {round}.

## Checks
{checks}

## Setup
1. Clone this repository
2. Open `index.html` in a web browser

## Usage
Open the HTML file directly or visit the GitHub Pages site for this repository.
No build process is required.

## License
MIT License. See `LICENSE`.
",
        brief = brief.replace('\n', "\n> "),
    )
}
