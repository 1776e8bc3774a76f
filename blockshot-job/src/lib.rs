//! Job orchestration: one container in, three views and a material
//! manifest out, under a per-job output directory.

pub mod config;
pub mod error;
pub mod job;
pub mod layout;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{ErrorKind, JobError};
pub use job::{JobResult, JobStatus, RenderJob, TransitionError};
pub use layout::{JobLayout, split_name};
pub use pipeline::Pipeline;
