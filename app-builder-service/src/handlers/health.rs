use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::{get_metrics, DeployError, GeneratorError};
use crate::startup::AppState;

const SERVICE_NAME: &str = "app-builder-service";

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "LLM App Builder",
        "status": "running",
        "endpoints": {
            "build": "/build",
            "health": "/health"
        }
    }))
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "github_configured": state.config.github_configured(),
        "llm_configured": state.config.llm_configured(),
        "secret_configured": state.config.secret_configured()
    }))
}

/// Ready when the registry answers. GitHub and LLM reachability are
/// reported alongside; a failing provider marks the service degraded.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = &state.pipeline;
    let registry = pipeline.registry();

    let (registry_check, github_check, llm_check) = tokio::join!(
        registry.health_check(),
        pipeline.deployer().health_check(),
        pipeline.generator().provider().health_check(),
    );

    let github = match github_check {
        Ok(()) => "ok",
        Err(DeployError::NotConfigured(_)) => "not_configured",
        Err(e) => {
            tracing::warn!(error = %e, "GitHub check failed");
            "unavailable"
        }
    };
    let llm = match llm_check {
        Ok(()) => "ok",
        Err(GeneratorError::NotConfigured(_)) => "not_configured",
        Err(e) => {
            tracing::warn!(error = %e, "LLM check failed");
            "unavailable"
        }
    };

    match registry_check {
        Ok(()) => {
            let status = if github == "ok" && llm == "ok" {
                "ready"
            } else {
                "degraded"
            };
            (
                StatusCode::OK,
                Json(json!({
                    "status": status,
                    "registry": registry.backend(),
                    "github": github,
                    "llm": llm,
                    "builds_in_flight": pipeline.in_flight()
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "registry": registry.backend(),
                    "github": github,
                    "llm": llm
                })),
            )
        }
    }
}

pub async fn metrics() -> impl IntoResponse {
    get_metrics()
}
