use axum::{extract::State, http::HeaderMap, Json};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::observability::extract_request_id;
use service_core::utils::shared_secret_matches;
use validator::Validate;

use crate::config::AppBuilderConfig;
use crate::models::{BuildAccepted, BuildRequest};
use crate::startup::AppState;
use crate::workers::BuildJob;

/// Accept a build or revision and run it in the background.
pub async fn build(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BuildRequest>,
) -> Result<Json<BuildAccepted>, AppError> {
    verify_secret(&state.config, &request.secret)?;
    request.validate()?;

    if !request.has_valid_task_id() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Task id may only contain letters, digits, '.', '-' and '_'"
        )));
    }

    tracing::info!(
        task = %request.task,
        round = request.round,
        email = %request.email,
        attachments = request.attachments.len(),
        "Build request accepted"
    );

    let accepted = BuildAccepted::for_request(&request);
    state
        .pipeline
        .submit(BuildJob::new(request).with_request_id(extract_request_id(&headers)));

    Ok(Json(accepted))
}

fn verify_secret(config: &AppBuilderConfig, provided: &str) -> Result<(), AppError> {
    let Some(expected) = config.auth.secret_key.as_ref() else {
        tracing::error!("SECRET_KEY is not configured; rejecting build request");
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "Server configuration error"
        )));
    };

    if !shared_secret_matches(expected.expose_secret(), provided) {
        tracing::warn!("Build request with invalid secret");
        return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid secret")));
    }

    Ok(())
}
