use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BuildRequest;

/// Where a build ended up on GitHub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

/// Body POSTed to the requester's `evaluation_url` once an app is live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationPayload {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

impl EvaluationPayload {
    pub fn new(request: &BuildRequest, deployment: &Deployment) -> Self {
        Self {
            email: request.email.clone(),
            task: request.task.clone(),
            round: request.round,
            nonce: request.nonce.clone(),
            repo_url: deployment.repo_url.clone(),
            commit_sha: deployment.commit_sha.clone(),
            pages_url: deployment.pages_url.clone(),
        }
    }
}

/// Registry record linking a task to the repository created in round 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRepo {
    pub task: String,
    pub repo_url: String,
    pub owner: String,
    pub repo_name: String,
    pub last_commit_sha: String,
    pub last_round: u32,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_utc: DateTime<Utc>,
}

impl TaskRepo {
    pub fn new(
        task: &str,
        owner: &str,
        repo_name: &str,
        deployment: &Deployment,
        round: u32,
    ) -> Self {
        Self {
            task: task.to_string(),
            repo_url: deployment.repo_url.clone(),
            owner: owner.to_string(),
            repo_name: repo_name.to_string(),
            last_commit_sha: deployment.commit_sha.clone(),
            last_round: round,
            updated_utc: Utc::now(),
        }
    }

    /// Record a later round deployed to the same repository.
    pub fn advance(&mut self, deployment: &Deployment, round: u32) {
        self.last_commit_sha = deployment.commit_sha.clone();
        self.last_round = self.last_round.max(round);
        self.updated_utc = Utc::now();
    }

    pub fn pages_url(&self) -> String {
        pages_url(&self.owner, &self.repo_name)
    }
}

/// GitHub Pages project-site URL for `owner/repo`.
pub fn pages_url(owner: &str, repo_name: &str) -> String {
    format!("https://{}.github.io/{}/", owner, repo_name)
}
