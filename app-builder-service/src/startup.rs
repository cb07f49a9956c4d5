//! Application startup and lifecycle management.

use crate::config::AppBuilderConfig;
use crate::handlers;
use crate::services::{
    AppGenerator, Deployer, EvaluationClient, GenerationParams, GitHubConfig, GitHubDeployer,
    InMemoryRegistry, MongoRegistry, OpenAiCompatibleProvider, OpenAiConfig, RepoRegistry,
    TextProvider,
};
use crate::workers::BuildPipeline;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    create_ip_rate_limiter, ip_rate_limit_middleware, metrics_middleware,
    request_id_middleware, security_headers_middleware,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppBuilderConfig>,
    pub pipeline: BuildPipeline,
}

/// External collaborators of the build pipeline.
pub struct Providers {
    pub text: Arc<dyn TextProvider>,
    pub deployer: Arc<dyn Deployer>,
    pub registry: Arc<dyn RepoRegistry>,
}

impl Providers {
    /// Real providers as described by `config`.
    pub async fn from_config(config: &AppBuilderConfig) -> Result<Self, AppError> {
        if !config.llm_configured() {
            tracing::warn!("LLM_API_KEY not set; builds will fail at generation");
        }
        let text = OpenAiCompatibleProvider::new(OpenAiConfig {
            api_key: config.llm.api_key.clone(),
            base_url: config.llm.base_url.clone(),
            timeout: Duration::from_secs(config.llm.timeout_seconds),
        })
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e.to_string())))?;

        if !config.github_configured() {
            tracing::warn!("GITHUB_TOKEN not set; builds will fail at deployment");
        }
        let deployer = GitHubDeployer::new(GitHubConfig {
            token: config.github.token.clone(),
            api_url: config.github.api_url.clone(),
            pages_branch: config.github.pages_branch.clone(),
        })
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e.to_string())))?;

        let registry: Arc<dyn RepoRegistry> = match &config.registry.mongodb_uri {
            Some(uri) => {
                let registry = MongoRegistry::connect(uri, &config.registry.database)
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to connect to MongoDB: {}", e);
                        e
                    })?;
                registry.initialize_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    e
                })?;
                Arc::new(registry)
            }
            None => {
                tracing::info!("MONGODB_URI not set, using in-memory task registry");
                Arc::new(InMemoryRegistry::new())
            }
        };

        Ok(Self {
            text: Arc::new(text),
            deployer: Arc::new(deployer),
            registry,
        })
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: AppBuilderConfig) -> Result<Self, AppError> {
        let providers = Providers::from_config(&config).await?;
        Self::build_with_providers(config, providers).await
    }

    /// Build the application around injected providers.
    pub async fn build_with_providers(
        config: AppBuilderConfig,
        providers: Providers,
    ) -> Result<Self, AppError> {
        let generator = AppGenerator::new(
            providers.text,
            GenerationParams {
                model: config.llm.model.clone(),
                max_tokens: config.llm.max_tokens,
                temperature: None,
            },
        );

        let evaluator =
            EvaluationClient::new(config.evaluation.timeout(), config.evaluation.retry_config());

        let pipeline = BuildPipeline::new(
            Arc::new(generator),
            providers.deployer,
            providers.registry,
            evaluator,
            config.pipeline.clone(),
        );

        // Port 0 = random port for testing
        let address = config.common.bind_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            secret_configured = config.secret_configured(),
            github_configured = config.github_configured(),
            llm_configured = config.llm_configured(),
            "App builder service listening"
        );

        Ok(Self {
            port,
            listener,
            state: AppState {
                config: Arc::new(config),
                pipeline,
            },
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run until a shutdown signal arrives, then drain in-flight builds.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let pipeline = self.state.pipeline.clone();
        let drain_timeout = self.state.config.pipeline.time_limit();
        let router = router(self.state);

        axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        pipeline.shutdown(drain_timeout).await;
        tracing::info!("App builder service stopped");
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let build_limiter = create_ip_rate_limiter(state.config.rate_limit.builds_per_minute, 60);

    let build_routes = Router::new()
        .route("/build", post(handlers::build))
        .route_layer(middleware::from_fn_with_state(
            build_limiter,
            ip_rate_limit_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .merge(build_routes)
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
