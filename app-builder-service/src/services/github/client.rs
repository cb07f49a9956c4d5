//! GitHub REST API deployer.

use super::{mit_license, CreatedRepo, DeployError, Deployer, LICENSE_FILE};
use crate::models::deployment::pages_url;
use crate::models::Deployment;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Datelike, Utc};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use service_core::retry::{retry_async, RetryConfig};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;

const USER_AGENT: &str = concat!("app-builder-service/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: Option<SecretString>,
    pub api_url: String,
    pub pages_branch: String,
}

pub struct GitHubDeployer {
    config: GitHubConfig,
    client: Client,
    login: OnceCell<String>,
    retry: RetryConfig,
}

impl GitHubDeployer {
    pub fn new(config: GitHubConfig) -> Result<Self, DeployError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DeployError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            login: OnceCell::new(),
            retry: RetryConfig {
                max_retries: 4,
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(8),
                backoff_multiplier: 2.0,
                add_jitter: true,
            },
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn token(&self) -> Result<&str, DeployError> {
        self.config
            .token
            .as_ref()
            .map(|t| t.expose_secret().as_str())
            .ok_or_else(|| DeployError::NotConfigured("GITHUB_TOKEN is not set".to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str) -> Result<Response, DeployError> {
        self.client
            .traced_get(&self.url(path))
            .bearer_auth(self.token()?)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| DeployError::Network(e.to_string()))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &T,
    ) -> Result<Response, DeployError> {
        let token = self.token()?;
        self.client
            .traced_request(method, &self.url(path))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| DeployError::Network(e.to_string()))
    }

    /// Login of the token's owner, fetched once.
    async fn login(&self) -> Result<&str, DeployError> {
        let login = self
            .login
            .get_or_try_init(|| async {
                let user: UserResponse = json_or_error(self.get("/user").await?).await?;
                tracing::info!(login = %user.login, "Resolved GitHub user");
                Ok::<_, DeployError>(user.login)
            })
            .await?;
        Ok(login.as_str())
    }

    async fn create_repo(
        &self,
        owner: &str,
        repo_name: &str,
        description: &str,
    ) -> Result<RepoResponse, DeployError> {
        let body = CreateRepoRequest {
            name: repo_name,
            description,
            private: false,
            auto_init: true,
        };

        let response = self
            .send_json(reqwest::Method::POST, "/user/repos", &body)
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let message = response.text().await.unwrap_or_default();
            if message.contains("already exists") {
                tracing::warn!(
                    repo = %repo_name,
                    "Repository already exists, reusing it"
                );
                return json_or_error(self.get(&format!("/repos/{}/{}", owner, repo_name)).await?)
                    .await;
            }
            return Err(DeployError::Api {
                status: 422,
                message,
            });
        }

        json_or_error(response).await
    }

    async fn file_sha(
        &self,
        owner: &str,
        repo_name: &str,
        path: &str,
    ) -> Result<Option<String>, DeployError> {
        Ok(self
            .get_contents(owner, repo_name, path)
            .await?
            .map(|c| c.sha))
    }

    async fn get_contents(
        &self,
        owner: &str,
        repo_name: &str,
        path: &str,
    ) -> Result<Option<ContentsResponse>, DeployError> {
        let response = self
            .get(&format!(
                "/repos/{}/{}/contents/{}?ref={}",
                owner, repo_name, path, self.config.pages_branch
            ))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        json_or_error(response).await.map(Some)
    }

    /// Create or update one file; returns the resulting commit sha.
    async fn put_file(
        &self,
        owner: &str,
        repo_name: &str,
        path: &str,
        content: &str,
    ) -> Result<String, DeployError> {
        retry_async(&self.retry, "github_put_file", move || async move {
            let sha = self.file_sha(owner, repo_name, path).await?;
            let message = match sha {
                Some(_) => format!("Update {}", path),
                None => format!("Add {}", path),
            };

            let body = PutContentsRequest {
                message: &message,
                content: STANDARD.encode(content.as_bytes()),
                sha: sha.as_deref(),
                branch: &self.config.pages_branch,
            };

            let response = self
                .send_json(
                    reqwest::Method::PUT,
                    &format!("/repos/{}/{}/contents/{}", owner, repo_name, path),
                    &body,
                )
                .await?;

            let put: PutContentsResponse = json_or_error(response).await?;
            tracing::debug!(repo = %repo_name, path = %path, commit = %put.commit.sha, "Pushed file");
            Ok(put.commit.sha)
        })
        .await
    }

    async fn push_files(
        &self,
        owner: &str,
        repo_name: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<Option<String>, DeployError> {
        let mut last_commit = None;
        for (path, content) in files {
            last_commit = Some(self.put_file(owner, repo_name, path, content).await?);
        }
        Ok(last_commit)
    }

    /// Pages may already be enabled; any failure here is logged, not fatal.
    async fn enable_pages(&self, owner: &str, repo_name: &str) {
        let body = PagesRequest {
            build_type: "legacy",
            source: PagesSource {
                branch: &self.config.pages_branch,
                path: "/",
            },
        };

        match self
            .send_json(
                reqwest::Method::POST,
                &format!("/repos/{}/{}/pages", owner, repo_name),
                &body,
            )
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::info!(repo = %repo_name, "Enabled GitHub Pages");
            }
            Ok(response) if response.status() == StatusCode::CONFLICT => {
                tracing::debug!(repo = %repo_name, "GitHub Pages already enabled");
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                tracing::warn!(repo = %repo_name, status = %status, body = %text, "Could not enable GitHub Pages");
            }
            Err(e) => {
                tracing::warn!(repo = %repo_name, error = %e, "Could not enable GitHub Pages");
            }
        }
    }

    async fn latest_commit(&self, owner: &str, repo_name: &str) -> Result<String, DeployError> {
        let commits: Vec<CommitResponse> = json_or_error(
            self.get(&format!(
                "/repos/{}/{}/commits?per_page=1&sha={}",
                owner, repo_name, self.config.pages_branch
            ))
            .await?,
        )
        .await?;

        commits
            .into_iter()
            .next()
            .map(|c| c.sha)
            .ok_or_else(|| DeployError::Api {
                status: 404,
                message: format!("No commits in {}/{}", owner, repo_name),
            })
    }
}

async fn json_or_error<T: DeserializeOwned>(response: Response) -> Result<T, DeployError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(DeployError::Api {
            status: status.as_u16(),
            message,
        });
    }

    response.json().await.map_err(|e| DeployError::Api {
        status: status.as_u16(),
        message: format!("Failed to parse response: {}", e),
    })
}

#[async_trait]
impl Deployer for GitHubDeployer {
    async fn create_and_deploy(
        &self,
        repo_name: &str,
        description: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<CreatedRepo, DeployError> {
        let login = self.login().await?.to_string();
        let repo = self.create_repo(&login, repo_name, description).await?;
        let owner = repo.owner.login.clone();

        tracing::info!(repo_url = %repo.html_url, "Repository ready");

        let mut all_files = BTreeMap::new();
        all_files.insert(
            LICENSE_FILE.to_string(),
            mit_license(Utc::now().year(), &owner),
        );
        all_files.extend(files.iter().map(|(k, v)| (k.clone(), v.clone())));

        let pushed = self.push_files(&owner, &repo.name, &all_files).await?;
        self.enable_pages(&owner, &repo.name).await;

        let commit_sha = match pushed {
            Some(sha) => sha,
            None => self.latest_commit(&owner, &repo.name).await?,
        };

        Ok(CreatedRepo {
            owner: owner.clone(),
            repo_name: repo.name.clone(),
            deployment: Deployment {
                repo_url: repo.html_url,
                commit_sha,
                pages_url: pages_url(&owner, &repo.name),
            },
        })
    }

    async fn update(
        &self,
        owner: &str,
        repo_name: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<Deployment, DeployError> {
        let repo: RepoResponse =
            json_or_error(self.get(&format!("/repos/{}/{}", owner, repo_name)).await?).await?;

        let commit_sha = match self.push_files(owner, repo_name, files).await? {
            Some(sha) => sha,
            None => self.latest_commit(owner, repo_name).await?,
        };

        Ok(Deployment {
            repo_url: repo.html_url,
            commit_sha,
            pages_url: pages_url(owner, repo_name),
        })
    }

    async fn read_file(
        &self,
        owner: &str,
        repo_name: &str,
        path: &str,
    ) -> Result<Option<String>, DeployError> {
        let Some(contents) = self.get_contents(owner, repo_name, path).await? else {
            return Ok(None);
        };

        let Some(encoded) = contents.content else {
            return Ok(None);
        };
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        // Files over 1 MB come back with an empty `content`
        if compact.is_empty() {
            tracing::debug!(repo = %repo_name, path = %path, "Contents API returned no inline content");
            return Ok(None);
        }
        let bytes = STANDARD.decode(compact).map_err(|e| DeployError::Api {
            status: 200,
            message: format!("Undecodable contents for {}: {}", path, e),
        })?;

        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn health_check(&self) -> Result<(), DeployError> {
        self.login().await.map(|_| ())
    }
}

// ============================================================================
// GitHub API Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    description: &'a str,
    private: bool,
    auto_init: bool,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    html_url: String,
    owner: RepoOwner,
}

#[derive(Debug, Deserialize)]
struct RepoOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Debug, Serialize)]
struct PagesRequest<'a> {
    build_type: &'a str,
    source: PagesSource<'a>,
}

#[derive(Debug, Serialize)]
struct PagesSource<'a> {
    branch: &'a str,
    path: &'a str,
}
