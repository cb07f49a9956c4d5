//! In-memory deployer for tests.

use super::{mit_license, CreatedRepo, DeployError, Deployer, LICENSE_FILE};
use crate::models::deployment::pages_url;
use crate::models::Deployment;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const MOCK_OWNER: &str = "mock-user";

/// A deployer call as seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployCall {
    Create { repo_name: String },
    Update { repo_name: String },
}

/// Keeps repositories as file maps and hands out sequential commit shas.
#[derive(Default)]
pub struct MockDeployer {
    repos: DashMap<String, BTreeMap<String, String>>,
    commits: AtomicU64,
    calls: Mutex<Vec<DeployCall>>,
    fail: bool,
}

impl MockDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deployer whose every write fails with a GitHub 403.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<DeployCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Current contents of `path` in `repo_name`.
    pub fn file(&self, repo_name: &str, path: &str) -> Option<String> {
        self.repos
            .get(repo_name)
            .and_then(|files| files.get(path).cloned())
    }

    fn record(&self, call: DeployCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn next_sha(&self) -> String {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{:040x}", n)
    }

    fn check_writable(&self) -> Result<(), DeployError> {
        if self.fail {
            return Err(DeployError::Api {
                status: 403,
                message: "mock deployer failure".to_string(),
            });
        }
        Ok(())
    }

    fn deployment(&self, repo_name: &str) -> Deployment {
        Deployment {
            repo_url: format!("https://github.com/{}/{}", MOCK_OWNER, repo_name),
            commit_sha: self.next_sha(),
            pages_url: pages_url(MOCK_OWNER, repo_name),
        }
    }
}

#[async_trait]
impl Deployer for MockDeployer {
    async fn create_and_deploy(
        &self,
        repo_name: &str,
        _description: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<CreatedRepo, DeployError> {
        self.record(DeployCall::Create {
            repo_name: repo_name.to_string(),
        });
        self.check_writable()?;

        let mut contents = files.clone();
        contents.insert(LICENSE_FILE.to_string(), mit_license(2026, MOCK_OWNER));
        self.repos.insert(repo_name.to_string(), contents);

        Ok(CreatedRepo {
            owner: MOCK_OWNER.to_string(),
            repo_name: repo_name.to_string(),
            deployment: self.deployment(repo_name),
        })
    }

    async fn update(
        &self,
        owner: &str,
        repo_name: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<Deployment, DeployError> {
        self.record(DeployCall::Update {
            repo_name: repo_name.to_string(),
        });
        self.check_writable()?;

        let mut repo = self.repos.get_mut(repo_name).ok_or_else(|| DeployError::Api {
            status: 404,
            message: format!("{}/{} not found", owner, repo_name),
        })?;
        repo.extend(files.iter().map(|(k, v)| (k.clone(), v.clone())));
        drop(repo);

        Ok(self.deployment(repo_name))
    }

    async fn read_file(
        &self,
        _owner: &str,
        repo_name: &str,
        path: &str,
    ) -> Result<Option<String>, DeployError> {
        Ok(self.file(repo_name, path))
    }

    async fn health_check(&self) -> Result<(), DeployError> {
        Ok(())
    }
}
