pub mod attachments;
pub mod evaluation;
pub mod generator;
pub mod github;
pub mod metrics;
pub mod registry;
pub mod secret_scanner;

pub use attachments::{process_attachments, ProcessedAttachment};
pub use evaluation::{EvaluationClient, EvaluationError};
pub use generator::{
    AppGenerator, GeneratedApp, GenerationParams, GenerationRequest, GeneratorError,
    MockTextProvider, OpenAiCompatibleProvider, OpenAiConfig, TextProvider,
};
pub use github::{
    CreatedRepo, DeployError, Deployer, GitHubConfig, GitHubDeployer, MockDeployer,
};
pub use metrics::{
    get_metrics, init_metrics, record_build, record_build_duration, record_evaluation,
    record_llm_tokens,
};
pub use registry::{InMemoryRegistry, MongoRegistry, RepoRegistry};
pub use secret_scanner::{Findings, SecretScanner};
