//! Notifies the requester's evaluation endpoint once an app is live.

use reqwest::{Client, StatusCode};
use service_core::observability::TracedClientExt;
use service_core::retry::{retry_async, RetryConfig, Retryable};
use std::time::Duration;
use thiserror::Error;

use crate::models::EvaluationPayload;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Evaluation endpoint answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),
}

impl Retryable for EvaluationError {
    fn is_retryable(&self) -> bool {
        // Any non-200 counts as a failed attempt
        true
    }
}

#[derive(Clone)]
pub struct EvaluationClient {
    client: Client,
    timeout: Duration,
    retry: RetryConfig,
}

impl EvaluationClient {
    pub fn new(timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            timeout,
            retry,
        }
    }

    /// POST `payload` to `url` until it answers 200 or attempts run out.
    /// `request_id` is forwarded as `x-request-id`.
    pub async fn submit(
        &self,
        url: &str,
        payload: &EvaluationPayload,
        request_id: Option<&str>,
    ) -> Result<(), EvaluationError> {
        retry_async(&self.retry, "submit_evaluation", || {
            self.attempt(url, payload, request_id)
        })
        .await?;

        tracing::info!(
            task = %payload.task,
            round = payload.round,
            "Evaluation submitted"
        );
        Ok(())
    }

    async fn attempt(
        &self,
        url: &str,
        payload: &EvaluationPayload,
        request_id: Option<&str>,
    ) -> Result<(), EvaluationError> {
        let request = self
            .client
            .traced_post(url)
            .header("Content-Type", "application/json")
            .json(payload)
            .timeout(self.timeout);

        let response = match request_id {
            Some(id) => request.send_with_request_id(id).await,
            None => request.send().await,
        }
        .map_err(|e| EvaluationError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(200)
            .collect();
        Err(EvaluationError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
