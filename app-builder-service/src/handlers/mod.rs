//! HTTP handlers for app-builder-service.

pub mod build;
pub mod health;

pub use build::build;
pub use health::{health_check, metrics, readiness_check, root};
