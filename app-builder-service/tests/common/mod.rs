#![allow(dead_code)]

use app_builder_service::config::{
    AppBuilderConfig, AuthConfig, EvaluationConfig, GithubConfig, LlmConfig, PipelineConfig,
    RateLimitConfig, RegistryConfig, SecretScanMode,
};
use app_builder_service::models::EvaluationPayload;
use app_builder_service::services::init_metrics;
use app_builder_service::startup::Application;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::SecretString;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SECRET: &str = "test-shared-secret";
pub const GITHUB_TOKEN: &str = "gh-test-token";
pub const LLM_API_KEY: &str = "llm-test-key";
pub const FAKE_OWNER: &str = "octo-fake";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub github: Arc<FakeGitHub>,
    pub llm: Arc<FakeLlm>,
    pub evaluations: Arc<EvaluationSink>,
    pub evaluation_url: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_secret(Some(SECRET)).await
    }

    pub async fn spawn_with_secret(secret: Option<&str>) -> Self {
        Self::spawn_with(secret, 1000, GITHUB_TOKEN).await
    }

    pub async fn spawn_with_rate_limit(builds_per_minute: u32) -> Self {
        Self::spawn_with(Some(SECRET), builds_per_minute, GITHUB_TOKEN).await
    }

    /// App whose GitHub token the fake GitHub does not accept.
    pub async fn spawn_with_github_token(token: &str) -> Self {
        Self::spawn_with(Some(SECRET), 1000, token).await
    }

    async fn spawn_with(secret: Option<&str>, builds_per_minute: u32, github_token: &str) -> Self {
        init_metrics();

        let github = Arc::new(FakeGitHub::default());
        let github_url = serve(fake_github_router(github.clone())).await;

        let llm = Arc::new(FakeLlm::default());
        let llm_url = serve(fake_llm_router(llm.clone())).await;

        let evaluations = Arc::new(EvaluationSink::default());
        let evaluation_base = serve(evaluation_router(evaluations.clone())).await;

        // Use random port for testing (port 0)
        let config = AppBuilderConfig {
            common: CoreConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            auth: AuthConfig {
                secret_key: secret.map(|s| SecretString::new(s.to_string())),
            },
            llm: LlmConfig {
                api_key: Some(SecretString::new(LLM_API_KEY.to_string())),
                base_url: llm_url,
                model: "test-model".to_string(),
                max_tokens: 4000,
                timeout_seconds: 10,
            },
            github: GithubConfig {
                token: Some(SecretString::new(github_token.to_string())),
                api_url: github_url,
                pages_branch: "main".to_string(),
            },
            evaluation: EvaluationConfig {
                timeout_seconds: 5,
                max_attempts: 2,
                initial_backoff_ms: 10,
            },
            pipeline: PipelineConfig {
                time_limit_seconds: 600,
                pages_settle_ms: 0,
                secret_scan_mode: SecretScanMode::Redact,
            },
            registry: RegistryConfig {
                mongodb_uri: None,
                database: "app_builder_test".to_string(),
            },
            rate_limit: RateLimitConfig { builds_per_minute },
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            github,
            llm,
            evaluations,
            evaluation_url: format!("{}/evaluate", evaluation_base),
        }
    }

    /// A valid build request body for `task` and `round`.
    pub fn build_body(&self, task: &str, round: u32) -> Value {
        json!({
            "email": "student@example.com",
            "secret": SECRET,
            "task": task,
            "round": round,
            "nonce": format!("nonce-{}-{}", task, round),
            "brief": "Create a page that shows a greeting",
            "checks": ["Page has an h1", "Greeting is visible"],
            "evaluation_url": self.evaluation_url,
            "attachments": [
                { "name": "greeting.txt", "url": "data:text/plain;base64,SGVsbG8gdGhlcmU=" }
            ]
        })
    }

    pub async fn post_build(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/build", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Poll until the evaluation sink holds at least `count` payloads.
    pub async fn wait_for_evaluations(&self, count: usize) -> Vec<EvaluationPayload> {
        for _ in 0..200 {
            let received = self.evaluations.received();
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "expected {} evaluation(s), got {}",
            count,
            self.evaluations.received().len()
        );
    }
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake server");
    let addr = listener.local_addr().expect("Failed to read fake server address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{}", addr)
}

// ============================================================================
// Fake GitHub REST API
// ============================================================================

#[derive(Default)]
pub struct FakeGitHub {
    repos: Mutex<HashSet<String>>,
    /// (repo, path) -> (blob sha, raw content)
    files: Mutex<HashMap<(String, String), (String, String)>>,
    head: Mutex<HashMap<String, String>>,
    pages: Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl FakeGitHub {
    pub fn repo_count(&self) -> usize {
        self.repos.lock().unwrap().len()
    }

    pub fn file(&self, repo: &str, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(&(repo.to_string(), path.to_string()))
            .map(|(_, content)| content.clone())
    }

    pub fn head(&self, repo: &str) -> Option<String> {
        self.head.lock().unwrap().get(repo).cloned()
    }

    pub fn pages_enabled(&self, repo: &str) -> bool {
        self.pages.lock().unwrap().iter().any(|r| r == repo)
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn commit(&self, repo: &str) -> String {
        let sha = format!("{:040x}", self.next());
        self.head
            .lock()
            .unwrap()
            .insert(repo.to_string(), sha.clone());
        sha
    }
}

fn repo_json(name: &str) -> Value {
    json!({
        "name": name,
        "html_url": format!("https://github.com/{}/{}", FAKE_OWNER, name),
        "owner": { "login": FAKE_OWNER }
    })
}

fn fake_github_router(state: Arc<FakeGitHub>) -> Router {
    Router::new()
        .route("/user", get(github_user))
        .route("/user/repos", post(github_create_repo))
        .route("/repos/:owner/:repo", get(github_get_repo))
        .route(
            "/repos/:owner/:repo/contents/*path",
            get(github_get_contents).put(github_put_contents),
        )
        .route("/repos/:owner/:repo/pages", post(github_enable_pages))
        .route("/repos/:owner/:repo/commits", get(github_commits))
        .with_state(state)
}

async fn github_user(headers: HeaderMap) -> impl IntoResponse {
    let expected = format!("Bearer {}", GITHUB_TOKEN);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => {
            (StatusCode::OK, Json(json!({ "login": FAKE_OWNER })))
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Bad credentials" })),
        ),
    }
}

async fn github_create_repo(
    State(state): State<Arc<FakeGitHub>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    if !state.repos.lock().unwrap().insert(name.clone()) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "message": "Repository creation failed.",
                "errors": [{ "message": "name already exists on this account" }]
            })),
        );
    }

    if body["auto_init"].as_bool() == Some(true) {
        state.commit(&name);
    }
    (StatusCode::CREATED, Json(repo_json(&name)))
}

async fn github_get_repo(
    State(state): State<Arc<FakeGitHub>>,
    Path((_owner, repo)): Path<(String, String)>,
) -> impl IntoResponse {
    if state.repos.lock().unwrap().contains(&repo) {
        (StatusCode::OK, Json(repo_json(&repo)))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" })))
    }
}

async fn github_get_contents(
    State(state): State<Arc<FakeGitHub>>,
    Path((_owner, repo, path)): Path<(String, String, String)>,
) -> impl IntoResponse {
    match state.files.lock().unwrap().get(&(repo, path.clone())) {
        Some((sha, content)) => {
            // GitHub wraps base64 content at 60 columns
            let encoded = STANDARD.encode(content.as_bytes());
            let wrapped = encoded
                .as_bytes()
                .chunks(60)
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect::<Vec<_>>()
                .join("\n");
            (
                StatusCode::OK,
                Json(json!({ "path": path, "sha": sha, "encoding": "base64", "content": wrapped })),
            )
        }
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))),
    }
}

async fn github_put_contents(
    State(state): State<Arc<FakeGitHub>>,
    Path((_owner, repo, path)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if !state.repos.lock().unwrap().contains(&repo) {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" })));
    }

    let key = (repo.clone(), path.clone());
    let current_sha = state
        .files
        .lock()
        .unwrap()
        .get(&key)
        .map(|(sha, _)| sha.clone());
    if current_sha.as_deref() != body["sha"].as_str() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "message": "\"sha\" wasn't supplied or does not match" })),
        );
    }

    let content = body["content"]
        .as_str()
        .and_then(|c| STANDARD.decode(c).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default();
    let blob_sha = format!("blob-{}", state.next());
    state
        .files
        .lock()
        .unwrap()
        .insert(key, (blob_sha.clone(), content));
    let commit_sha = state.commit(&repo);

    (
        StatusCode::CREATED,
        Json(json!({
            "content": { "path": path, "sha": blob_sha },
            "commit": { "sha": commit_sha }
        })),
    )
}

async fn github_enable_pages(
    State(state): State<Arc<FakeGitHub>>,
    Path((_owner, repo)): Path<(String, String)>,
) -> impl IntoResponse {
    let mut pages = state.pages.lock().unwrap();
    if pages.contains(&repo) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "message": "GitHub Pages is already enabled." })),
        );
    }
    pages.push(repo.clone());
    (
        StatusCode::CREATED,
        Json(json!({ "html_url": format!("https://{}.github.io/{}/", FAKE_OWNER, repo) })),
    )
}

async fn github_commits(
    State(state): State<Arc<FakeGitHub>>,
    Path((_owner, repo)): Path<(String, String)>,
) -> impl IntoResponse {
    let commits: Vec<Value> = state
        .head(&repo)
        .map(|sha| vec![json!({ "sha": sha })])
        .unwrap_or_default();
    Json(commits)
}

// ============================================================================
// Fake OpenAI-compatible LLM
// ============================================================================

#[derive(Default)]
pub struct FakeLlm {
    prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

fn fake_llm_router(state: Arc<FakeLlm>) -> Router {
    Router::new()
        .route("/chat/completions", post(llm_complete))
        .route("/models", get(llm_models))
        .with_state(state)
}

async fn llm_models(headers: HeaderMap) -> impl IntoResponse {
    let expected = format!("Bearer {}", LLM_API_KEY);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => (
            StatusCode::OK,
            Json(json!({ "object": "list", "data": [{ "id": "test-model", "object": "model" }] })),
        ),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "message": "Invalid API Key" } })),
        ),
    }
}

async fn llm_complete(
    State(state): State<Arc<FakeLlm>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let prompt = body["messages"][1]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let version = {
        let mut prompts = state.prompts.lock().unwrap();
        prompts.push(prompt);
        prompts.len()
    };

    let reply = format!(
        "Here is the app:\n```html\n<!DOCTYPE html>\n<html><body><h1>Version {}</h1></body></html>\n```",
        version
    );

    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": reply }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 40 }
    }))
}

// ============================================================================
// Evaluation endpoint
// ============================================================================

#[derive(Default)]
pub struct EvaluationSink {
    received: Mutex<Vec<EvaluationPayload>>,
    request_ids: Mutex<Vec<Option<String>>>,
}

impl EvaluationSink {
    pub fn received(&self) -> Vec<EvaluationPayload> {
        self.received.lock().unwrap().clone()
    }

    pub fn request_ids(&self) -> Vec<Option<String>> {
        self.request_ids.lock().unwrap().clone()
    }
}

fn evaluation_router(state: Arc<EvaluationSink>) -> Router {
    Router::new()
        .route("/evaluate", post(receive_evaluation))
        .with_state(state)
}

async fn receive_evaluation(
    State(state): State<Arc<EvaluationSink>>,
    headers: HeaderMap,
    Json(payload): Json<EvaluationPayload>,
) -> StatusCode {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.request_ids.lock().unwrap().push(request_id);
    state.received.lock().unwrap().push(payload);
    StatusCode::OK
}
