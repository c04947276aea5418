//! Containerized shell step
//!
//! Writes the rendered script into the workspace, makes sure the image is
//! available per the pull policy, runs the script as a container's
//! entrypoint with the workspace bind-mounted, and races termination
//! against the step's interrupt signals. The container is force-removed
//! on every path.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use gantry_core::SharedEnv;
use gantry_core::domain::pipeline::{ImagePullPolicy, ShellConfig, Step, StepConfig};

use crate::container::{ContainerRuntime, ContainerSpec};
use crate::executor::{StepContext, StepRunner, interruptible};
use crate::joblog::JobLogger;

/// Where the workspace is mounted inside step containers
pub const WORK_DIR_IN_CONTAINER: &str = "/code";

/// Executor for [`gantry_core::domain::pipeline::StepKind::ContainerShell`]
pub struct ShellRunner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ShellRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    fn wrap_script(script: &str) -> String {
        format!("#!/bin/bash\n{script}\n")
    }

    fn rendered_config(step: &Step, cfg: &ShellConfig, env: &SharedEnv) -> ShellConfig {
        if step.no_env_render {
            return cfg.clone();
        }
        ShellConfig {
            script: env.render(&cfg.script),
            image: env.render(&cfg.image),
            pull_policy: cfg.pull_policy,
        }
    }

    async fn ensure_image(&self, ctx: &StepContext, cfg: &ShellConfig, log: &JobLogger) -> Result<()> {
        let pull = match cfg.pull_policy {
            ImagePullPolicy::Never => false,
            ImagePullPolicy::Always => true,
            ImagePullPolicy::IfNotPresent => {
                match interruptible(ctx, self.runtime.image_present(&cfg.image)).await {
                    Ok(present) => !present,
                    Err(e) => {
                        // an unreadable local listing falls back to pulling
                        log.warning(&format!("image listing failed: {e:#}"));
                        true
                    }
                }
            }
        };

        if !pull {
            return Ok(());
        }

        log.info(&format!("pulling image [{}]...", cfg.image));
        interruptible(ctx, self.runtime.pull_image(&cfg.image, log))
            .await
            .with_context(|| format!("image pull for [{}] failed", cfg.image))
    }

    async fn supervise(&self, ctx: &StepContext, id: &str, log: &JobLogger) -> Result<()> {
        interruptible(ctx, self.runtime.start_container(id))
            .await
            .context("container start failed")?;

        interruptible(ctx, self.runtime.stream_logs(id, log))
            .await
            .context("container log streaming failed")?;

        log.info("waiting for the container to finish...");

        let (mut status_rx, mut err_rx) = self.runtime.wait_container(id).await;
        tokio::select! {
            _ = ctx.done() => Err(anyhow!("shell script execution timed out")),
            Some(e) = err_rx.recv() => Err(e).context("shell script execution failed"),
            Some(exit) = status_rx.recv() => {
                if let Some(message) = exit.error {
                    Err(anyhow!("container wait reported an error: {message}"))
                } else if exit.status_code != 0 {
                    Err(anyhow!("shell script exited with code {}", exit.status_code))
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        work_dir: &Path,
        cfg: &ShellConfig,
        script_in_container: &str,
        env: &SharedEnv,
        log: &JobLogger,
    ) -> Result<()> {
        self.ensure_image(ctx, cfg, log).await?;

        let spec = ContainerSpec {
            image: cfg.image.clone(),
            env: env.snapshot().into_iter().collect(),
            entrypoint: vec!["sh".to_string(), script_in_container.to_string()],
            working_dir: WORK_DIR_IN_CONTAINER.to_string(),
            bind: (work_dir.to_path_buf(), WORK_DIR_IN_CONTAINER.to_string()),
        };

        log.info("creating container...");
        let id = interruptible(ctx, self.runtime.create_container(&spec))
            .await
            .context("container creation failed")?;

        log.info("starting container...");
        let outcome = self.supervise(ctx, &id, log).await;

        // forced removal is best-effort, regardless of the outcome
        let _ = self.runtime.remove_container(&id).await;

        outcome
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(
        &self,
        ctx: &StepContext,
        work_dir: &Path,
        step: &Step,
        env: &SharedEnv,
        log: &Arc<JobLogger>,
    ) -> Result<()> {
        let StepConfig::Shell(cfg) = &step.config else {
            bail!("shell step is missing its shell configuration");
        };
        let cfg = Self::rendered_config(step, cfg, env);

        let script_name = format!("step-{}.sh", Uuid::new_v4());
        let script_path = work_dir.join(&script_name);
        let script_in_container = format!("{WORK_DIR_IN_CONTAINER}/{script_name}");

        std::fs::write(&script_path, Self::wrap_script(&cfg.script))
            .context("failed to write the step script into the workspace")?;

        let result = self
            .execute(ctx, work_dir, &cfg, &script_in_container, env, log)
            .await;

        let _ = std::fs::remove_file(&script_path);
        result
    }
}

#[cfg(test)]
pub(crate) mod testsupport {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::container::ContainerExit;

    /// Scripted container runtime shared by executor and processor tests
    pub(crate) struct MockRuntime {
        pub present: bool,
        pub pulls: Mutex<Vec<String>>,
        pub creates: Mutex<Vec<ContainerSpec>>,
        pub exits: Mutex<VecDeque<i64>>,
        pub removed: Mutex<Vec<String>>,
    }

    impl MockRuntime {
        pub fn new(present: bool, exits: &[i64]) -> Arc<Self> {
            Arc::new(Self {
                present,
                pulls: Mutex::new(Vec::new()),
                creates: Mutex::new(Vec::new()),
                exits: Mutex::new(exits.iter().copied().collect()),
                removed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn image_present(&self, _reference: &str) -> Result<bool> {
            Ok(self.present)
        }

        async fn pull_image(&self, reference: &str, _log: &JobLogger) -> Result<()> {
            self.pulls.lock().unwrap().push(reference.to_string());
            Ok(())
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
            let mut creates = self.creates.lock().unwrap();
            creates.push(spec.clone());
            Ok(format!("container-{}", creates.len()))
        }

        async fn start_container(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn stream_logs(&self, _id: &str, log: &JobLogger) -> Result<()> {
            log.write_bytes(b"container output\n");
            Ok(())
        }

        async fn wait_container(
            &self,
            _id: &str,
        ) -> (mpsc::Receiver<ContainerExit>, mpsc::Receiver<anyhow::Error>) {
            let (status_tx, status_rx) = mpsc::channel(1);
            let (_err_tx, err_rx) = mpsc::channel(1);

            let next_exit = self.exits.lock().unwrap().pop_front();
            if let Some(code) = next_exit {
                status_tx
                    .send(ContainerExit {
                        status_code: code,
                        error: None,
                    })
                    .await
                    .unwrap();
            }
            (status_rx, err_rx)
        }

        async fn remove_container(&self, id: &str) -> Result<()> {
            self.removed.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }
}
