use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{ErrorKind, JobError};
use crate::layout::JobLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

#[derive(Debug, Error)]
#[error("job cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One conversion request and where its files live.
#[derive(Debug, Clone)]
pub struct RenderJob {
    layout: JobLayout,
    status: JobStatus,
}

impl RenderJob {
    pub fn new(layout: JobLayout) -> Self {
        Self {
            layout,
            status: JobStatus::Pending,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.layout.job_id()
    }

    pub fn base_name(&self) -> &str {
        self.layout.base_name()
    }

    pub fn upload_path(&self) -> &Path {
        self.layout.upload_path()
    }

    pub fn output_dir(&self) -> &Path {
        self.layout.output_dir()
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        );
        if !allowed {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)
    }

    pub fn succeed(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Succeeded)
    }

    pub fn fail(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)
    }
}

/// What the pipeline reports back for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materials: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materials_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl JobResult {
    pub fn failed(job_id: Uuid, error: &JobError) -> Self {
        Self {
            success: false,
            job_id: Some(job_id.to_string()),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockshot_nbt::ContainerError;

    fn job() -> RenderJob {
        RenderJob::new(JobLayout::new(
            Uuid::nil(),
            "a.litematic",
            Path::new("up"),
            Path::new("out"),
        ))
    }

    #[test]
    fn test_status_transitions() {
        let mut job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.succeed().is_err());
        job.start().unwrap();
        job.succeed().unwrap();
        assert!(job.status().is_terminal());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut job = job();
        job.start().unwrap();
        job.fail().unwrap();
        for result in [job.start(), job.succeed(), job.fail()] {
            assert!(result.is_err());
        }
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn test_failure_result_shape() {
        let err = JobError::from(ContainerError::Decompression("container is empty".into()));
        let json = serde_json::to_value(JobResult::failed(Uuid::nil(), &err)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": false,
                "jobId": Uuid::nil().to_string(),
                "error": "decode failed: decompression failed: container is empty",
                "errorKind": "decompression",
            })
        );
    }
}
