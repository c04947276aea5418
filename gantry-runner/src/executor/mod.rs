//! Step execution
//!
//! [`StepRunner`] is the single seam between the pipeline processor and
//! the pluggable capabilities: one implementation per step kind, bound at
//! construction time into a kind-keyed dispatch table. Executors receive a
//! [`StepContext`] carrying the cancellation token and the effective
//! deadline and are expected to react to either promptly.

pub mod checkout;
pub mod image;
pub mod script;
pub mod shell;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use gantry_core::SharedEnv;
use gantry_core::domain::pipeline::{Step, StepKind, VcsKind};
use gantry_lua::VmPool;

use crate::container::ContainerCli;
use crate::executor::checkout::{CheckoutRunner, GitCli, SourceControl};
use crate::executor::image::ImageBuildRunner;
use crate::executor::script::{ReqwestHttpBridge, ScriptRunner};
use crate::executor::shell::ShellRunner;
use crate::joblog::JobLogger;

/// Upper bound for one step's execution
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Upper bound for a whole pipeline's execution
pub const PIPELINE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Marker carried in an error chain when execution was cut short by an
/// explicit stop or delete rather than by a failure of its own
///
/// Outcome classification checks for it with `Error::is::<Canceled>`, so a
/// pipeline stopped mid-step resolves to `Canceled` instead of `Failed`.
#[derive(Debug, Error)]
#[error("execution canceled")]
pub struct Canceled;

/// Cancellation token plus effective deadline for one step
///
/// The deadline already accounts for the pipeline-wide bound, so a step
/// deadline can never outlive its pipeline's.
#[derive(Debug, Clone)]
pub struct StepContext {
    cancel: CancellationToken,
    deadline: Instant,
}

impl StepContext {
    pub fn new(cancel: CancellationToken, deadline: Instant) -> Self {
        Self { cancel, deadline }
    }

    #[cfg(test)]
    pub fn with_timeout(cancel: CancellationToken, timeout: Duration) -> Self {
        Self::new(cancel, Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Resolves when the step should stop: cancellation or deadline,
    /// whichever comes first
    pub async fn done(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    /// The error describing why [`StepContext::done`] resolved
    pub fn interrupt_error(&self) -> anyhow::Error {
        if self.cancel.is_cancelled() {
            anyhow::Error::new(Canceled)
        } else {
            anyhow::anyhow!("step deadline exceeded")
        }
    }
}

/// Races a capability call against the step's interrupt signals
pub(crate) async fn interruptible<T>(
    ctx: &StepContext,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = ctx.done() => Err(ctx.interrupt_error()),
        res = fut => res,
    }
}

/// Contract every step executor implements
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Executes one step in `work_dir`, reading and writing the shared
    /// environment and streaming output into the job log
    async fn run(
        &self,
        ctx: &StepContext,
        work_dir: &Path,
        step: &Step,
        env: &SharedEnv,
        log: &Arc<JobLogger>,
    ) -> Result<()>;
}

/// Kind-keyed dispatch table the processor resolves executors through
pub type RunnerRegistry = HashMap<StepKind, Arc<dyn StepRunner>>;

/// The standard registry: CLI-backed git and container capabilities plus
/// the embedded interpreter
pub fn default_registry(
    container_bin: &str,
    git_bin: &str,
    vm_pool_capacity: usize,
) -> RunnerRegistry {
    let container = Arc::new(ContainerCli::new(container_bin));

    let mut vcs_clients: HashMap<VcsKind, Arc<dyn SourceControl>> = HashMap::new();
    vcs_clients.insert(VcsKind::Git, Arc::new(GitCli::new(git_bin)));

    let mut registry: RunnerRegistry = HashMap::new();
    registry.insert(
        StepKind::SourceCheckout,
        Arc::new(CheckoutRunner::new(vcs_clients)),
    );
    registry.insert(
        StepKind::ContainerShell,
        Arc::new(ShellRunner::new(container.clone())),
    );
    registry.insert(StepKind::ImageBuild, Arc::new(ImageBuildRunner::new(container)));
    registry.insert(
        StepKind::Script,
        Arc::new(ScriptRunner::new(
            Arc::new(VmPool::with_capacity(vm_pool_capacity)),
            Arc::new(ReqwestHttpBridge::new()),
        )),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupt_error_distinguishes_cancel_from_deadline() {
        let token = CancellationToken::new();
        let ctx = StepContext::with_timeout(token.clone(), Duration::from_millis(5));

        // deadline fires first
        ctx.done().await;
        assert!(!ctx.interrupt_error().is::<Canceled>());

        // with the token fired the marker takes precedence
        token.cancel();
        assert!(ctx.interrupt_error().is::<Canceled>());
    }

    #[tokio::test]
    async fn test_done_resolves_on_cancellation() {
        let token = CancellationToken::new();
        let ctx = StepContext::with_timeout(token.clone(), Duration::from_secs(60));

        let waiter = tokio::spawn(async move { ctx.done().await });
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("done should resolve once cancelled")
            .unwrap();
    }

    #[test]
    fn test_default_registry_covers_all_step_kinds() {
        let registry = default_registry("docker", "git", 2);
        assert!(registry.contains_key(&StepKind::SourceCheckout));
        assert!(registry.contains_key(&StepKind::ContainerShell));
        assert!(registry.contains_key(&StepKind::ImageBuild));
        assert!(registry.contains_key(&StepKind::Script));
    }
}
