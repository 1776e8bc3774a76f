use std::fmt;
use std::io;

use blockshot_nbt::{ContainerError, ModelBuildError};
use blockshot_render::{EnvError, RenderError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stage a job failed in, reported alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decompression,
    FormatMismatch,
    ModelBuild,
    ReadinessTimeout,
    Environment,
    Render,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Decompression => "decompression",
            ErrorKind::FormatMismatch => "format_mismatch",
            ErrorKind::ModelBuild => "model_build",
            ErrorKind::ReadinessTimeout => "readiness_timeout",
            ErrorKind::Environment => "environment",
            ErrorKind::Render => "render",
            ErrorKind::Io => "io",
        })
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("decode failed: {0}")]
    Decode(#[from] ContainerError),
    #[error("model build failed: {0}")]
    ModelBuild(#[from] ModelBuildError),
    #[error("environment failed: {0}")]
    Environment(#[from] EnvError),
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("manifest serialization failed: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl JobError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        JobError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Decode(ContainerError::Decompression(_)) => ErrorKind::Decompression,
            JobError::Decode(_) => ErrorKind::FormatMismatch,
            JobError::ModelBuild(_) => ErrorKind::ModelBuild,
            JobError::Environment(e) | JobError::Render(RenderError::Env(e)) => env_kind(e),
            JobError::Render(_) => ErrorKind::Render,
            JobError::Io { .. } | JobError::Manifest(_) => ErrorKind::Io,
        }
    }
}

fn env_kind(error: &EnvError) -> ErrorKind {
    match error {
        EnvError::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
        _ => ErrorKind::Environment,
    }
}
