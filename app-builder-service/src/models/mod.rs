//! Domain models for the app builder service.

pub mod build;
pub mod deployment;

pub use build::{Attachment, BuildAccepted, BuildRequest};
pub use deployment::{Deployment, EvaluationPayload, TaskRepo};
