//! Live progress records
//!
//! Mutated only by the pipeline processor, read by any number of
//! concurrent callers. Updates are wholesale record replacements, so a
//! reader may observe a stale snapshot but never a half-written one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::pipeline::Pipeline;

/// Lifecycle status of a pipeline or of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Created,
    Started,
    Running,
    Succeed,
    Failed,
    Canceled,
}

impl Status {
    /// Whether this status ends the lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Succeed | Status::Failed | Status::Canceled)
    }
}

/// Snapshot of one pipeline's execution state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineProgress {
    pub pipeline: Pipeline,
    pub status: Status,
    pub create_time: Option<chrono::DateTime<chrono::Utc>>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub finish_time: Option<chrono::DateTime<chrono::Utc>>,
    /// Uid of the step currently executing, if any
    pub current_step_uid: Option<String>,
    pub steps: Vec<StepProgress>,
    /// Environment snapshot taken at the last progress update
    pub env: HashMap<String, String>,
    pub fail_reason: Option<String>,
}

impl PipelineProgress {
    /// A fresh record for a submitted-but-not-yet-running pipeline
    pub fn created(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            status: Status::Created,
            create_time: Some(chrono::Utc::now()),
            start_time: None,
            finish_time: None,
            current_step_uid: None,
            steps: Vec::new(),
            env: HashMap::new(),
            fail_reason: None,
        }
    }
}

/// Per-step slice of a [`PipelineProgress`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProgress {
    pub step_uid: String,
    pub status: Status,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub finish_time: Option<chrono::DateTime<chrono::Utc>>,
    pub fail_reason: Option<String>,
}

impl StepProgress {
    /// A record for a step that just started executing
    pub fn running(step_uid: impl Into<String>) -> Self {
        Self {
            step_uid: step_uid.into(),
            status: Status::Running,
            start_time: Some(chrono::Utc::now()),
            finish_time: None,
            fail_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(Status::Succeed.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Canceled.is_terminal());
        assert!(!Status::Created.is_terminal());
        assert!(!Status::Started.is_terminal());
        assert!(!Status::Running.is_terminal());
    }

    #[test]
    fn test_created_progress_defaults() {
        let pipeline = Pipeline {
            uid: "p-1".to_string(),
            title: "build".to_string(),
            params: HashMap::new(),
            steps: Vec::new(),
        };

        let progress = PipelineProgress::created(pipeline);
        assert_eq!(progress.status, Status::Created);
        assert!(progress.create_time.is_some());
        assert!(progress.start_time.is_none());
        assert!(progress.steps.is_empty());
        assert!(progress.fail_reason.is_none());
    }
}
