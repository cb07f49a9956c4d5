use serde::{Deserialize, Serialize};
use validator::Validate;

/// A file handed to the generator, usually as a `data:` URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// Inbound request to build (round 1) or revise (round 2+) an app.
#[derive(Clone, Deserialize, Validate)]
pub struct BuildRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub secret: String,
    #[validate(length(min = 1, max = 90, message = "Task id must be 1-90 characters"))]
    pub task: String,
    #[validate(range(min = 1, message = "Round must be at least 1"))]
    pub round: u32,
    pub nonce: String,
    #[validate(length(min = 1, message = "Brief cannot be empty"))]
    pub brief: String,
    #[serde(default)]
    pub checks: Vec<String>,
    #[validate(url(message = "Evaluation URL must be a valid URL"))]
    pub evaluation_url: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl std::fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildRequest")
            .field("email", &self.email)
            .field("secret", &"[REDACTED]")
            .field("task", &self.task)
            .field("round", &self.round)
            .field("nonce", &self.nonce)
            .field("brief_len", &self.brief.len())
            .field("checks", &self.checks.len())
            .field("evaluation_url", &self.evaluation_url)
            .field("attachments", &self.attachments.len())
            .finish()
    }
}

impl BuildRequest {
    /// Task ids end up in repository names, so only `[A-Za-z0-9._-]` is allowed.
    pub fn has_valid_task_id(&self) -> bool {
        !self.task.is_empty()
            && self
                .task
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }

    /// Name of the repository that hosts this task's app.
    pub fn repo_name(&self) -> String {
        repo_name_for(&self.task)
    }

    pub fn is_revision(&self) -> bool {
        self.round > 1
    }
}

pub fn repo_name_for(task: &str) -> String {
    format!("app-{}", task)
}

/// Immediate acknowledgement returned by `POST /build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildAccepted {
    pub status: String,
    pub message: String,
    pub task: String,
    pub round: u32,
}

impl BuildAccepted {
    pub fn for_request(request: &BuildRequest) -> Self {
        Self {
            status: "accepted".to_string(),
            message: format!(
                "Building app for task {}, round {}",
                request.task, request.round
            ),
            task: request.task.clone(),
            round: request.round,
        }
    }
}
