//! Deployment of generated apps to GitHub Pages.

pub mod client;
pub mod mock;

use async_trait::async_trait;
use service_core::retry::Retryable;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::Deployment;

pub use client::{GitHubConfig, GitHubDeployer};
pub use mock::{DeployCall, MockDeployer, MOCK_OWNER};

pub const LICENSE_FILE: &str = "LICENSE";

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Deployer not configured: {0}")]
    NotConfigured(String),

    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid repository URL: {0}")]
    InvalidRepoUrl(String),
}

impl Retryable for DeployError {
    fn is_retryable(&self) -> bool {
        match self {
            DeployError::Network(_) => true,
            // 409: freshly auto-initialised repo not ready yet
            DeployError::Api { status, .. } => *status >= 500 || *status == 409 || *status == 429,
            _ => false,
        }
    }
}

/// Result of creating a repository for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRepo {
    pub owner: String,
    pub repo_name: String,
    pub deployment: Deployment,
}

/// Trait for static-hosting deployment targets.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Create `repo_name`, push license and files, and turn on Pages.
    async fn create_and_deploy(
        &self,
        repo_name: &str,
        description: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<CreatedRepo, DeployError>;

    /// Push new contents for files in an existing repository.
    async fn update(
        &self,
        owner: &str,
        repo_name: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<Deployment, DeployError>;

    /// Current contents of a file, `None` when it does not exist.
    async fn read_file(
        &self,
        owner: &str,
        repo_name: &str,
        path: &str,
    ) -> Result<Option<String>, DeployError>;

    async fn health_check(&self) -> Result<(), DeployError>;
}

/// Split `https://github.com/{owner}/{repo}` into its last two path segments.
pub fn parse_repo_url(repo_url: &str) -> Result<(String, String), DeployError> {
    let trimmed = repo_url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let mut segments = trimmed.rsplit('/');
    match (segments.next(), segments.next()) {
        (Some(repo), Some(owner))
            if !repo.is_empty() && !owner.is_empty() && !owner.ends_with(':') =>
        {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(DeployError::InvalidRepoUrl(repo_url.to_string())),
    }
}

pub fn mit_license(year: i32, holder: &str) -> String {
    format!(
        "MIT License

Copyright (c) {year} {holder}

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the \"Software\"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
"
    )
}
