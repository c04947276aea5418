//! Image-build step
//!
//! Stages a temporary build context holding the rendered Dockerfile,
//! issues a build tagged with the target image, optionally pushes, and
//! removes the staging directory unconditionally.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use gantry_core::SharedEnv;
use gantry_core::domain::pipeline::{ImageBuildConfig, Step, StepConfig};

use crate::container::ImageBuilder;
use crate::executor::{StepContext, StepRunner, interruptible};
use crate::joblog::JobLogger;

/// Executor for [`gantry_core::domain::pipeline::StepKind::ImageBuild`]
pub struct ImageBuildRunner {
    builder: Arc<dyn ImageBuilder>,
}

impl ImageBuildRunner {
    pub fn new(builder: Arc<dyn ImageBuilder>) -> Self {
        Self { builder }
    }

    fn rendered_config(step: &Step, cfg: &ImageBuildConfig, env: &SharedEnv) -> ImageBuildConfig {
        if step.no_env_render {
            return cfg.clone();
        }
        ImageBuildConfig {
            dockerfile: env.render(&cfg.dockerfile),
            target_image: env.render(&cfg.target_image),
            push_after_build: cfg.push_after_build,
        }
    }

    async fn build_and_push(
        &self,
        ctx: &StepContext,
        context_dir: &Path,
        cfg: &ImageBuildConfig,
        log: &JobLogger,
    ) -> Result<()> {
        std::fs::write(context_dir.join("Dockerfile"), &cfg.dockerfile)
            .context("failed to write the Dockerfile into the build context")?;

        log.info(&format!("building image [{}]...", cfg.target_image));
        interruptible(
            ctx,
            self.builder.build_image(context_dir, &cfg.target_image, log),
        )
        .await
        .with_context(|| format!("image build request for [{}] failed", cfg.target_image))?;

        if !cfg.push_after_build {
            return Ok(());
        }

        log.info(&format!("pushing image [{}]...", cfg.target_image));
        interruptible(ctx, self.builder.push_image(&cfg.target_image, log))
            .await
            .with_context(|| format!("image push for [{}] failed", cfg.target_image))
    }
}

#[async_trait]
impl StepRunner for ImageBuildRunner {
    async fn run(
        &self,
        ctx: &StepContext,
        work_dir: &Path,
        step: &Step,
        env: &SharedEnv,
        log: &Arc<JobLogger>,
    ) -> Result<()> {
        let StepConfig::ImageBuild(cfg) = &step.config else {
            bail!("image build step is missing its image build configuration");
        };
        let cfg = Self::rendered_config(step, cfg, env);

        let context_dir = work_dir.join(format!(".build-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&context_dir)
            .context("failed to stage the image build context")?;

        let result = self.build_and_push(ctx, &context_dir, &cfg, log).await;

        let _ = std::fs::remove_dir_all(&context_dir);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::ProcessCtx;
    use gantry_core::domain::pipeline::StepKind;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct RecordingBuilder {
        builds: Mutex<Vec<(PathBuf, String, String)>>,
        pushes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageBuilder for RecordingBuilder {
        async fn build_image(&self, context_dir: &Path, tag: &str, _log: &JobLogger) -> Result<()> {
            let dockerfile = std::fs::read_to_string(context_dir.join("Dockerfile"))
                .context("build context has no Dockerfile")?;
            self.builds
                .lock()
                .unwrap()
                .push((context_dir.to_path_buf(), tag.to_string(), dockerfile));
            Ok(())
        }

        async fn push_image(&self, tag: &str, _log: &JobLogger) -> Result<()> {
            self.pushes.lock().unwrap().push(tag.to_string());
            Ok(())
        }
    }

    fn image_step(dockerfile: &str, target: &str, push: bool) -> Step {
        Step {
            uid: "s1".to_string(),
            kind: StepKind::ImageBuild,
            no_env_render: false,
            config: StepConfig::ImageBuild(ImageBuildConfig {
                dockerfile: dockerfile.to_string(),
                target_image: target.to_string(),
                push_after_build: push,
            }),
        }
    }

    fn test_ctx() -> StepContext {
        StepContext::with_timeout(CancellationToken::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_build_receives_rendered_dockerfile() {
        let builder = Arc::new(RecordingBuilder::default());
        let runner = ImageBuildRunner::new(builder.clone());
        let workspace = tempfile::tempdir().unwrap();
        let log = Arc::new(JobLogger::new(vec![]));

        let env = SharedEnv::new(ProcessCtx::new());
        env.set("BASE", "alpine:3.20");
        env.set("TAG", "v7");

        runner
            .run(
                &test_ctx(),
                workspace.path(),
                &image_step("FROM ${BASE}\n", "registry.test/app:${TAG}", false),
                &env,
                &log,
            )
            .await
            .unwrap();

        let builds = builder.builds.lock().unwrap();
        let (_, tag, dockerfile) = &builds[0];
        assert_eq!(tag, "registry.test/app:v7");
        assert_eq!(dockerfile, "FROM alpine:3.20\n");
        assert!(builder.pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_only_when_configured() {
        let builder = Arc::new(RecordingBuilder::default());
        let runner = ImageBuildRunner::new(builder.clone());
        let workspace = tempfile::tempdir().unwrap();
        let log = Arc::new(JobLogger::new(vec![]));

        runner
            .run(
                &test_ctx(),
                workspace.path(),
                &image_step("FROM scratch\n", "registry.test/app:push", true),
                &SharedEnv::new(ProcessCtx::new()),
                &log,
            )
            .await
            .unwrap();

        assert_eq!(
            *builder.pushes.lock().unwrap(),
            vec!["registry.test/app:push".to_string()]
        );
    }

    #[tokio::test]
    async fn test_staging_directory_is_removed_after_the_build() {
        let builder = Arc::new(RecordingBuilder::default());
        let runner = ImageBuildRunner::new(builder.clone());
        let workspace = tempfile::tempdir().unwrap();
        let log = Arc::new(JobLogger::new(vec![]));

        runner
            .run(
                &test_ctx(),
                workspace.path(),
                &image_step("FROM scratch\n", "registry.test/app:tidy", false),
                &SharedEnv::new(ProcessCtx::new()),
                &log,
            )
            .await
            .unwrap();

        let staged_dir = &builder.builds.lock().unwrap()[0].0;
        assert!(!staged_dir.exists());
        let leftovers: Vec<_> = std::fs::read_dir(workspace.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_config_is_an_error() {
        let builder = Arc::new(RecordingBuilder::default());
        let runner = ImageBuildRunner::new(builder);
        let workspace = tempfile::tempdir().unwrap();
        let log = Arc::new(JobLogger::new(vec![]));

        let step = Step {
            uid: "s1".to_string(),
            kind: StepKind::ImageBuild,
            no_env_render: false,
            config: StepConfig::Script(gantry_core::domain::pipeline::ScriptConfig {
                source: String::new(),
            }),
        };

        let err = runner
            .run(
                &test_ctx(),
                workspace.path(),
                &step,
                &SharedEnv::new(ProcessCtx::new()),
                &log,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing its image build configuration"));
    }
}
