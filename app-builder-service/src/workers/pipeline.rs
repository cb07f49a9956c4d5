use dashmap::DashMap;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::{PipelineConfig, SecretScanMode};
use crate::models::{BuildRequest, Deployment, EvaluationPayload, TaskRepo};
use crate::services::attachments::process_attachments;
use crate::services::evaluation::{EvaluationClient, EvaluationError};
use crate::services::generator::{AppGenerator, GenerationRequest, GeneratorError, INDEX_HTML};
use crate::services::github::{DeployError, Deployer};
use crate::services::metrics;
use crate::services::registry::RepoRegistry;
use crate::services::secret_scanner::{format_findings, redact, SecretScanner};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No repository recorded for task '{0}'")]
    MissingRepo(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GeneratorError),

    #[error("{0} potential secret(s) in generated files")]
    SecretsDetected(usize),

    #[error("Deployment failed: {0}")]
    Deploy(#[from] DeployError),

    #[error("Registry error: {0}")]
    Registry(#[from] AppError),

    #[error("Evaluation submission failed: {0}")]
    Evaluation(#[from] EvaluationError),
}

impl PipelineError {
    /// Label used for the `outcome` metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            PipelineError::MissingRepo(_) => "missing_repo",
            PipelineError::Generation(_) => "generation_failed",
            PipelineError::SecretsDetected(_) => "secrets_blocked",
            PipelineError::Deploy(_) => "deploy_failed",
            PipelineError::Registry(_) => "registry_failed",
            PipelineError::Evaluation(_) => "evaluation_failed",
        }
    }
}

/// An accepted build request waiting to run.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub request: BuildRequest,
    /// Correlation id of the HTTP request that accepted the build.
    pub request_id: Option<String>,
    pub accepted_at: Instant,
}

impl BuildJob {
    pub fn new(request: BuildRequest) -> Self {
        Self {
            request,
            request_id: None,
            accepted_at: Instant::now(),
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Completion signal of the most recently submitted build of a task.
struct TaskTail {
    seq: u64,
    done: oneshot::Receiver<()>,
}

/// Runs accepted builds in the background: generate, deploy, register,
/// notify the evaluator.
#[derive(Clone)]
pub struct BuildPipeline {
    generator: Arc<AppGenerator>,
    deployer: Arc<dyn Deployer>,
    registry: Arc<dyn RepoRegistry>,
    evaluator: EvaluationClient,
    scanner: Arc<SecretScanner>,
    config: PipelineConfig,
    /// Builds of one task run in submission order.
    task_tails: Arc<DashMap<String, TaskTail>>,
    next_seq: Arc<AtomicU64>,
    tracker: TaskTracker,
}

impl BuildPipeline {
    pub fn new(
        generator: Arc<AppGenerator>,
        deployer: Arc<dyn Deployer>,
        registry: Arc<dyn RepoRegistry>,
        evaluator: EvaluationClient,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            deployer,
            registry,
            evaluator,
            scanner: Arc::new(SecretScanner::new()),
            config,
            task_tails: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            tracker: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn RepoRegistry> {
        &self.registry
    }

    pub fn generator(&self) -> &Arc<AppGenerator> {
        &self.generator
    }

    pub fn deployer(&self) -> &Arc<dyn Deployer> {
        &self.deployer
    }

    /// Builds currently running or waiting on an earlier build of their task.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Start `job` in the background and return immediately. The job waits
    /// for every build of the same task submitted before it.
    pub fn submit(&self, job: BuildJob) {
        let span = tracing::info_span!(
            "build",
            task = %job.request.task,
            round = job.request.round,
            request_id = job.request_id.as_deref().unwrap_or("-")
        );
        let task = job.request.task.clone();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let previous = self
            .task_tails
            .insert(task.clone(), TaskTail { seq, done: done_rx });
        let pipeline = self.clone();

        self.tracker.spawn(
            async move {
                if let Some(previous) = previous {
                    tracing::debug!("Waiting for earlier build of the same task");
                    // A dropped sender still means the earlier build is over
                    let _ = previous.done.await;
                }

                let _ = pipeline.execute(job).await;

                pipeline
                    .task_tails
                    .remove_if(&task, |_, tail| tail.seq == seq);
                let _ = done_tx.send(());
            }
            .instrument(span),
        );
    }

    /// Run one build to completion, recording its outcome. Ordering between
    /// builds of the same task is the caller's concern; `submit` provides it.
    pub async fn execute(&self, job: BuildJob) -> Result<Deployment, PipelineError> {
        let BuildJob {
            request,
            request_id,
            accepted_at,
        } = job;
        let kind = if request.is_revision() {
            "revise"
        } else {
            "create"
        };

        let result = self
            .run(&request, request_id.as_deref(), accepted_at)
            .await;

        match &result {
            Ok(deployment) => {
                metrics::record_build(kind, "success");
                metrics::record_build_duration(kind, accepted_at.elapsed().as_secs_f64());
                tracing::info!(
                    task = %request.task,
                    round = request.round,
                    repo_url = %deployment.repo_url,
                    commit_sha = %deployment.commit_sha,
                    duration_ms = accepted_at.elapsed().as_millis() as u64,
                    "Build completed"
                );
            }
            Err(e) => {
                metrics::record_build(kind, e.outcome());
                tracing::error!(
                    task = %request.task,
                    round = request.round,
                    outcome = e.outcome(),
                    error = %e,
                    "Build failed"
                );
            }
        }

        result
    }

    async fn run(
        &self,
        request: &BuildRequest,
        request_id: Option<&str>,
        accepted_at: Instant,
    ) -> Result<Deployment, PipelineError> {
        let attachments = process_attachments(&request.attachments);

        let existing = if request.is_revision() {
            let record = self
                .registry
                .get(&request.task)
                .await?
                .ok_or_else(|| PipelineError::MissingRepo(request.task.clone()))?;
            Some(record)
        } else {
            None
        };

        let previous_html = match &existing {
            Some(record) => self.previous_html(record).await,
            None => None,
        };

        let generated = self
            .generator
            .generate(&GenerationRequest {
                brief: request.brief.clone(),
                checks: request.checks.clone(),
                round: request.round,
                attachments,
                previous_html,
            })
            .await?;

        metrics::record_llm_tokens(
            self.generator.provider().name(),
            generated.input_tokens,
            generated.output_tokens,
        );

        let mut files = generated.into_files();
        self.apply_secret_policy(request, &mut files)?;

        let (deployment, record) = match existing {
            Some(mut record) => {
                let deployment = self
                    .deployer
                    .update(&record.owner, &record.repo_name, &files)
                    .await?;
                record.advance(&deployment, request.round);
                (deployment, record)
            }
            None => {
                let description = format!("Generated app for task {}", request.task);
                let created = self
                    .deployer
                    .create_and_deploy(&request.repo_name(), &description, &files)
                    .await?;
                let record = TaskRepo::new(
                    &request.task,
                    &created.owner,
                    &created.repo_name,
                    &created.deployment,
                    request.round,
                );
                (created.deployment, record)
            }
        };

        tracing::info!(
            task = %request.task,
            round = request.round,
            repo_url = %deployment.repo_url,
            pages_url = %deployment.pages_url,
            "App deployed"
        );

        if let Err(e) = self.registry.put(&record).await {
            // The app is live; still notify the evaluator
            tracing::error!(task = %request.task, error = %e, "Failed to record task repository");
        }

        let elapsed = accepted_at.elapsed();
        if self.config.time_limit_reached(elapsed) {
            tracing::warn!(
                task = %request.task,
                round = request.round,
                elapsed_secs = elapsed.as_secs(),
                limit_secs = self.config.time_limit_seconds,
                "Build exceeded time limit"
            );
        }

        let settle = self.config.pages_settle();
        if settle > Duration::ZERO {
            tokio::time::sleep(settle).await;
        }

        let payload = EvaluationPayload::new(request, &deployment);
        match self
            .evaluator
            .submit(&request.evaluation_url, &payload, request_id)
            .await {
            Ok(()) => metrics::record_evaluation("success"),
            Err(e) => {
                metrics::record_evaluation("failed");
                return Err(e.into());
            }
        }

        Ok(deployment)
    }

    async fn previous_html(&self, record: &TaskRepo) -> Option<String> {
        match self
            .deployer
            .read_file(&record.owner, &record.repo_name, INDEX_HTML)
            .await
        {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(
                    task = %record.task,
                    error = %e,
                    "Could not read current index.html, regenerating from scratch"
                );
                None
            }
        }
    }

    fn apply_secret_policy(
        &self,
        request: &BuildRequest,
        files: &mut BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        let findings = self.scanner.scan_files(files);
        if findings.is_empty() {
            return Ok(());
        }

        let credentials = findings
            .values()
            .flatten()
            .filter(|f| f.is_credential())
            .count();

        tracing::warn!(
            task = %request.task,
            round = request.round,
            credentials,
            report = %format_findings(&findings),
            "Generated files contain potential secrets"
        );

        match self.config.secret_scan_mode {
            SecretScanMode::Warn => Ok(()),
            SecretScanMode::Redact => {
                let replaced = redact(files, &findings);
                if replaced > 0 {
                    tracing::info!(task = %request.task, replaced, "Redacted secrets before push");
                }
                Ok(())
            }
            SecretScanMode::Block if credentials > 0 => {
                Err(PipelineError::SecretsDetected(credentials))
            }
            SecretScanMode::Block => Ok(()),
        }
    }

    /// Stop accepting builds and wait up to `timeout` for running ones.
    /// Returns false when builds were still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight builds");
        }

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pending = self.tracker.len(),
                    "Shutdown deadline reached with builds still running"
                );
                false
            }
        }
    }
}
