//! Pipeline processor
//!
//! Owns the per-pipeline state machine
//! (`Created → Started → Running → Succeed | Failed | Canceled`), the
//! progress table, and the control surface transports call into:
//! init, progress query, log query, stop, delete. Execution itself is
//! driven by a worker through [`MessageProcessor::run`].
//!
//! Progress entries are replaced wholesale on every transition, so
//! concurrent readers may see a stale snapshot but never a torn record.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gantry_core::domain::pipeline::{Pipeline, Step};
use gantry_core::domain::progress::{PipelineProgress, Status, StepProgress};
use gantry_core::{ProcessCtx, SharedEnv, env};

use crate::consumer::MessageProcessor;
use crate::executor::{Canceled, PIPELINE_TIMEOUT, RunnerRegistry, STEP_TIMEOUT, StepContext};
use crate::joblog::JobLogger;
use crate::queue::Message;

/// Errors surfaced by the processor's control operations
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("pipeline [{0}] not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runtime record for one pipeline, replaced wholesale on every update
#[derive(Clone)]
pub struct PipelineRunEntity {
    pub progress: PipelineProgress,
    pub job_dir: PathBuf,
    pub cancel: CancellationToken,
}

/// The execution engine's thread-safe surface
pub struct PipelineProcessor {
    root_path: PathBuf,
    runners: RunnerRegistry,
    table: Mutex<HashMap<String, PipelineRunEntity>>,
}

impl PipelineProcessor {
    pub fn new(root_path: impl Into<PathBuf>, runners: RunnerRegistry) -> Self {
        Self {
            root_path: root_path.into(),
            runners,
            table: Mutex::new(HashMap::new()),
        }
    }

    fn job_dir(&self, uid: &str) -> PathBuf {
        self.root_path.join(format!("job-{uid}"))
    }

    fn job_log_file(job_dir: &Path) -> PathBuf {
        job_dir.join("data").join("job.log")
    }

    fn store(&self, uid: &str, entity: PipelineRunEntity) {
        self.table
            .lock()
            .expect("progress table lock")
            .insert(uid.to_string(), entity);
    }

    fn load(&self, uid: &str) -> Result<PipelineRunEntity, ProcessorError> {
        self.table
            .lock()
            .expect("progress table lock")
            .get(uid)
            .cloned()
            .ok_or_else(|| ProcessorError::NotFound(uid.to_string()))
    }

    /// Installs a `Created` record so submitters can query state before a
    /// worker picks the pipeline up
    pub fn init_pipeline(&self, pipeline: Pipeline) {
        let uid = pipeline.uid.clone();
        let entity = PipelineRunEntity {
            job_dir: self.job_dir(&uid),
            progress: PipelineProgress::created(pipeline),
            cancel: CancellationToken::new(),
        };
        self.store(&uid, entity);
    }

    pub fn get_pipeline_progress(&self, uid: &str) -> Result<PipelineProgress, ProcessorError> {
        Ok(self.load(uid)?.progress)
    }

    /// Returns the persisted job log; an absent file is an empty result,
    /// not an error
    pub fn get_pipeline_log(&self, uid: &str) -> Result<Vec<u8>, ProcessorError> {
        let entity = self.load(uid)?;
        match std::fs::read(Self::job_log_file(&entity.job_dir)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fires the pipeline's cancellation handle without waiting for the
    /// running step to observe it
    pub fn stop_pipeline(&self, uid: &str) -> Result<(), ProcessorError> {
        self.load(uid)?.cancel.cancel();
        Ok(())
    }

    /// Cancels, removes the progress entry, and reclaims the job
    /// directory; irreversible
    pub fn delete_pipeline(&self, uid: &str) -> Result<(), ProcessorError> {
        let entity = self
            .table
            .lock()
            .expect("progress table lock")
            .remove(uid)
            .ok_or_else(|| ProcessorError::NotFound(uid.to_string()))?;

        entity.cancel.cancel();

        if let Err(e) = std::fs::remove_dir_all(&entity.job_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(pipeline = %uid, error = %e, "failed to remove job directory");
            }
        }
        Ok(())
    }

    async fn run_step(
        &self,
        ctx: &StepContext,
        index: usize,
        step: &Step,
        work_dir: &Path,
        shared_env: &SharedEnv,
        log: &std::sync::Arc<JobLogger>,
    ) -> Result<()> {
        let Some(runner) = self.runners.get(&step.kind) else {
            log.warning(&format!("unknown step kind [{}]", step.kind));
            return Err(anyhow!("unknown step kind [{}]", step.kind));
        };

        log.info(&format!("=========== step [{index}] started ==========="));
        log.info(&format!("step info: index={index} kind={}", step.kind));

        let result = runner.run(ctx, work_dir, step, shared_env, log).await;

        match &result {
            Ok(()) => log.info(&format!("step [{index}] succeeded")),
            Err(e) => log.error(&format!("step [{index}] failed: {e:#}")),
        }
        log.info(&format!("=========== step [{index}] finished ==========="));

        result.with_context(|| format!("step execution failed, index=[{index}], kind=[{}]", step.kind))
    }

    async fn execute(&self, token: CancellationToken, msg: Message) -> bool {
        let pipeline: Pipeline = match serde_json::from_value(msg.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                warn!(msg_id = %msg.id, error = %e, "message payload is not a pipeline, requeueing");
                return true;
            }
        };

        if pipeline.uid.is_empty() {
            warn!(msg_id = %msg.id, "pipeline uid must not be empty, dropping message");
            return false;
        }
        let uid = pipeline.uid.clone();

        let job_dir = self.job_dir(&uid);
        let work_dir = job_dir.join("workspace");
        let data_dir = job_dir.join("data");
        let log_path = Self::job_log_file(&job_dir);

        let cancel = token.child_token();
        let pipeline_deadline = Instant::now() + PIPELINE_TIMEOUT;

        let shared_env = SharedEnv::new(ProcessCtx::new());
        shared_env.append([(env::BUILD_ID_VAR.to_string(), uid.clone())]);
        shared_env.append(pipeline.params.clone());

        // an init-time record may already exist; keep its creation stamp
        let create_time = self
            .table
            .lock()
            .expect("progress table lock")
            .get(&uid)
            .and_then(|e| e.progress.create_time);

        let mut entity = PipelineRunEntity {
            progress: PipelineProgress {
                pipeline: pipeline.clone(),
                status: Status::Started,
                create_time,
                start_time: Some(chrono::Utc::now()),
                finish_time: None,
                current_step_uid: None,
                steps: Vec::new(),
                env: shared_env.snapshot(),
                fail_reason: None,
            },
            job_dir: job_dir.clone(),
            cancel: cancel.clone(),
        };
        self.store(&uid, entity.clone());

        if let Err(e) = std::fs::create_dir_all(&work_dir) {
            error!(pipeline = %uid, path = %work_dir.display(), error = %e, "failed to create the workspace directory");
            return false;
        }
        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            error!(pipeline = %uid, path = %data_dir.display(), error = %e, "failed to create the data directory");
            return false;
        }

        let log = match JobLogger::create(&uid, &log_path) {
            Ok(logger) => std::sync::Arc::new(logger),
            Err(e) => {
                error!(pipeline = %uid, path = %log_path.display(), error = %e, "failed to create the job log file");
                return false;
            }
        };

        log.info(&format!("pipeline started: {}", pipeline.title));

        entity.progress.status = Status::Running;
        self.store(&uid, entity.clone());

        for (index, step) in pipeline.steps.iter().enumerate() {
            let step_deadline = (Instant::now() + STEP_TIMEOUT).min(pipeline_deadline);
            let step_ctx = StepContext::new(cancel.clone(), step_deadline);

            entity.progress.steps.push(StepProgress::running(&step.uid));
            entity.progress.status = Status::Running;
            entity.progress.current_step_uid = Some(step.uid.clone());
            self.store(&uid, entity.clone());

            let result = self
                .run_step(&step_ctx, index, step, &work_dir, &shared_env, &log)
                .await;

            let mut break_now = false;
            let step_error = match result {
                Err(e) => Some(e),
                Ok(()) => {
                    if shared_env.pipeline_failed() {
                        Some(anyhow!("{}", shared_env.fail_reason()))
                    } else {
                        if shared_env.pipeline_succeed() {
                            break_now = true;
                        }
                        None
                    }
                }
            };

            if let Some(e) = step_error {
                if e.is::<Canceled>() {
                    entity.progress.steps[index].status = Status::Canceled;
                    entity.progress.steps[index].fail_reason =
                        Some(format!("step execution canceled: {e:#}"));
                } else {
                    entity.progress.steps[index].status = Status::Failed;
                    entity.progress.steps[index].fail_reason = Some(format!("{e:#}"));
                }
                error!(pipeline = %uid, step = index, "step execution failed");
                break_now = true;
            } else {
                entity.progress.steps[index].status = Status::Succeed;
            }

            entity.progress.env = shared_env.snapshot();
            entity.progress.steps[index].finish_time = Some(chrono::Utc::now());
            self.store(&uid, entity.clone());

            if break_now {
                break;
            }
        }

        // pipeline status and reason come from the first step that failed
        // or was canceled, which is not necessarily the one that stopped
        // the loop
        for (index, step_progress) in entity.progress.steps.iter().enumerate() {
            match step_progress.status {
                Status::Failed => {
                    entity.progress.status = Status::Failed;
                    entity.progress.fail_reason = Some(format!(
                        "step [index={index}] failed: {}",
                        step_progress.fail_reason.as_deref().unwrap_or("")
                    ));
                    break;
                }
                Status::Canceled => {
                    entity.progress.status = Status::Canceled;
                    entity.progress.fail_reason = Some(format!("step [index={index}] canceled"));
                    break;
                }
                _ => {}
            }
        }

        if !matches!(entity.progress.status, Status::Failed | Status::Canceled) {
            entity.progress.status = Status::Succeed;
        }

        entity.progress.finish_time = Some(chrono::Utc::now());
        entity.progress.current_step_uid = None;
        entity.progress.env = shared_env.snapshot();
        self.store(&uid, entity.clone());

        log.info(&format!("pipeline finished: {}", pipeline.title));
        info!(pipeline = %uid, status = ?entity.progress.status, "pipeline run complete");

        // the workspace is ephemeral; only data/ (with the log) survives
        let _ = std::fs::remove_dir_all(&work_dir);

        false
    }
}

#[async_trait]
impl MessageProcessor for PipelineProcessor {
    async fn run(&self, token: CancellationToken, msg: Message) -> bool {
        self.execute(token, msg).await
    }
}
