//! Container runtime and image-build capability boundaries
//!
//! The step executors never talk to a container engine directly; they go
//! through [`ContainerRuntime`] and [`ImageBuilder`]. The in-tree
//! implementation, [`ContainerCli`], drives a docker-compatible CLI as
//! subprocesses with their output piped into the job log. Tests substitute
//! recording fakes at the same traits.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::joblog::JobLogger;

/// Everything needed to create one step container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    /// Environment exported into the container
    pub env: Vec<(String, String)>,
    /// Entrypoint binary and arguments
    pub entrypoint: Vec<String>,
    /// Working directory inside the container
    pub working_dir: String,
    /// Host directory bind-mounted at the given container path
    pub bind: (PathBuf, String),
}

/// Terminal state reported by a container wait
#[derive(Debug, Clone)]
pub struct ContainerExit {
    pub status_code: i64,
    /// Error the runtime itself reported while waiting, if any
    pub error: Option<String>,
}

/// Container engine operations the shell step needs
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether a local image matches the reference
    async fn image_present(&self, reference: &str) -> Result<bool>;

    /// Pulls an image, streaming progress into the job log
    async fn pull_image(&self, reference: &str, log: &JobLogger) -> Result<()>;

    /// Creates a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Follows the container's combined output into the job log until the
    /// container stops
    async fn stream_logs(&self, id: &str, log: &JobLogger) -> Result<()>;

    /// Begins waiting for termination; exactly one of the returned
    /// channels eventually yields: exit state on the first, a wait
    /// failure on the second
    async fn wait_container(
        &self,
        id: &str,
    ) -> (mpsc::Receiver<ContainerExit>, mpsc::Receiver<anyhow::Error>);

    /// Force-removes a container; callers treat failures as best-effort
    async fn remove_container(&self, id: &str) -> Result<()>;
}

/// Image-build operations the image step needs
///
/// The build context arrives as a staged directory; how it is packaged for
/// the engine (tar upload, direct directory read) is this capability's
/// concern.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build_image(&self, context_dir: &Path, tag: &str, log: &JobLogger) -> Result<()>;
    async fn push_image(&self, tag: &str, log: &JobLogger) -> Result<()>;
}

/// Appends `:latest` when the last path segment carries no tag
pub fn normalize_reference(reference: &str) -> String {
    let last_segment = reference.rsplit('/').next().unwrap_or(reference);
    if last_segment.contains(':') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    }
}

/// CLI-backed implementation of both capabilities
///
/// The binary name is configurable so any docker-compatible engine works.
pub struct ContainerCli {
    binary: String,
}

impl ContainerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Runs to completion, capturing stdout; non-zero exit is an error
    async fn run_capture(&self, args: &[&str]) -> Result<String> {
        debug!(binary = %self.binary, ?args, "running container command");
        let output = self
            .command(args)
            .output()
            .await
            .with_context(|| format!("failed to run `{} {}`", self.binary, args.join(" ")))?;

        if !output.status.success() {
            bail!(
                "`{} {}` failed: {}",
                self.binary,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Runs to completion with stdout and stderr streamed into the job log
    async fn run_streamed(&self, args: &[&str], log: &JobLogger) -> Result<()> {
        debug!(binary = %self.binary, ?args, "running container command (streamed)");
        let mut child = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn `{} {}`", self.binary, args.join(" ")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stream_out = async {
            if let Some(reader) = stdout {
                let _ = log.read_from(reader).await;
            }
        };
        let stream_err = async {
            if let Some(reader) = stderr {
                let _ = log.read_from(reader).await;
            }
        };

        let (_, _, status) = tokio::join!(stream_out, stream_err, child.wait());
        let status = status
            .with_context(|| format!("failed to wait for `{} {}`", self.binary, args.join(" ")))?;

        if !status.success() {
            bail!("`{} {}` exited with {}", self.binary, args.join(" "), status);
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for ContainerCli {
    async fn image_present(&self, reference: &str) -> Result<bool> {
        let filter = format!("reference={}", normalize_reference(reference));
        let listing = self
            .run_capture(&[
                "image",
                "ls",
                "--format",
                "{{.Repository}}:{{.Tag}}",
                "--filter",
                &filter,
            ])
            .await?;
        Ok(!listing.trim().is_empty())
    }

    async fn pull_image(&self, reference: &str, log: &JobLogger) -> Result<()> {
        self.run_streamed(&["pull", reference], log).await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let bind = format!("{}:{}", spec.bind.0.display(), spec.bind.1);
        let mut args: Vec<String> = vec![
            "create".to_string(),
            "--tty".to_string(),
            "--workdir".to_string(),
            spec.working_dir.clone(),
            "--volume".to_string(),
            bind,
        ];
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(first) = spec.entrypoint.first() {
            args.push("--entrypoint".to_string());
            args.push(first.clone());
        }
        args.push(spec.image.clone());
        args.extend(spec.entrypoint.iter().skip(1).cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run_capture(&arg_refs).await?;
        let id = stdout.trim().to_string();
        if id.is_empty() {
            bail!("container engine returned no container id");
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.run_capture(&["start", id]).await.map(|_| ())
    }

    async fn stream_logs(&self, id: &str, log: &JobLogger) -> Result<()> {
        self.run_streamed(&["logs", "--follow", "--timestamps", id], log)
            .await
    }

    async fn wait_container(
        &self,
        id: &str,
    ) -> (mpsc::Receiver<ContainerExit>, mpsc::Receiver<anyhow::Error>) {
        let (status_tx, status_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);

        let binary = self.binary.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let result = Command::new(&binary).args(["wait", &id]).output().await;
            match result {
                Ok(output) if output.status.success() => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    match stdout.trim().parse::<i64>() {
                        Ok(code) => {
                            let _ = status_tx
                                .send(ContainerExit {
                                    status_code: code,
                                    error: None,
                                })
                                .await;
                        }
                        Err(e) => {
                            let _ = err_tx
                                .send(anyhow::anyhow!(
                                    "unparseable container wait output {:?}: {e}",
                                    stdout.trim()
                                ))
                                .await;
                        }
                    }
                }
                Ok(output) => {
                    let _ = err_tx
                        .send(anyhow::anyhow!(
                            "`{binary} wait {id}` failed: {}",
                            String::from_utf8_lossy(&output.stderr).trim()
                        ))
                        .await;
                }
                Err(e) => {
                    let _ = err_tx
                        .send(anyhow::Error::new(e).context(format!("failed to run `{binary} wait`")))
                        .await;
                }
            }
        });

        (status_rx, err_rx)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.run_capture(&["rm", "--force", id]).await.map(|_| ())
    }
}

#[async_trait]
impl ImageBuilder for ContainerCli {
    async fn build_image(&self, context_dir: &Path, tag: &str, log: &JobLogger) -> Result<()> {
        let dir = context_dir.display().to_string();
        self.run_streamed(&["build", "--tag", tag, &dir], log)
            .await
            .with_context(|| format!("image build for tag [{tag}] failed"))
    }

    async fn push_image(&self, tag: &str, log: &JobLogger) -> Result<()> {
        self.run_streamed(&["push", tag], log)
            .await
            .with_context(|| format!("image push for tag [{tag}] failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_reference_appends_latest() {
        assert_eq!(normalize_reference("alpine"), "alpine:latest");
        assert_eq!(
            normalize_reference("registry.test/team/tool"),
            "registry.test/team/tool:latest"
        );
    }

    #[test]
    fn test_normalize_reference_keeps_existing_tag() {
        assert_eq!(normalize_reference("alpine:3.20"), "alpine:3.20");
        assert_eq!(
            normalize_reference("registry.test:5000/team/tool:v2"),
            "registry.test:5000/team/tool:v2"
        );
    }

    #[test]
    fn test_normalize_reference_ignores_registry_port() {
        // the colon lives in the registry segment, not the image segment
        assert_eq!(
            normalize_reference("registry.test:5000/team/tool"),
            "registry.test:5000/team/tool:latest"
        );
    }
}
