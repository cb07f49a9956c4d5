mod pipeline;

pub use pipeline::{BuildJob, BuildPipeline, PipelineError};
