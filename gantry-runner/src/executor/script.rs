//! Embedded-script step
//!
//! Runs the rendered Lua source on a VM taken from the shared pool, with
//! the host bridges bound to this step's job log, shared environment, and
//! outbound HTTP client. The interpreter call is synchronous, so it runs
//! on a blocking thread raced against the step's interrupt signals; an
//! interrupted VM is discarded instead of returned to the pool.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use gantry_core::SharedEnv;
use gantry_core::domain::log::LogLevel;
use gantry_core::domain::pipeline::{Step, StepConfig};
use gantry_lua::{
    BridgeModule, EnvBridge, EnvModule, HttpBridge, HttpExchange, HttpModule, JsonModule,
    LogModule, ScriptLogSink, VmPool,
};

use crate::executor::{StepContext, StepRunner};
use crate::joblog::JobLogger;

/// Routes script log lines into the per-pipeline job log
struct JobLogSink {
    log: Arc<JobLogger>,
}

impl ScriptLogSink for JobLogSink {
    fn write(&self, level: LogLevel, message: &str) {
        self.log.log(level, message);
    }
}

/// Exposes the pipeline's shared environment to scripts
struct SharedEnvBridge {
    env: SharedEnv,
}

impl EnvBridge for SharedEnvBridge {
    fn get(&self, key: &str) -> Option<String> {
        self.env.get(key)
    }

    fn set(&self, key: &str, value: &str) {
        self.env.set(key, value);
    }

    fn fail(&self, reason: &str) {
        self.env.fail(reason);
    }
}

/// Blocking-reqwest implementation of the outbound HTTP bridge
///
/// Script steps execute on a blocking thread, so the synchronous client
/// is safe here; a client is built per call.
#[derive(Default)]
pub struct ReqwestHttpBridge;

impl ReqwestHttpBridge {
    pub fn new() -> Self {
        Self
    }

    fn exchange(result: reqwest::Result<reqwest::blocking::Response>) -> HttpExchange {
        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text() {
                    Ok(body) => HttpExchange {
                        status,
                        body,
                        error: String::new(),
                    },
                    Err(e) => HttpExchange {
                        status,
                        body: String::new(),
                        error: e.to_string(),
                    },
                }
            }
            Err(e) => HttpExchange::transport_error(e.to_string()),
        }
    }
}

impl HttpBridge for ReqwestHttpBridge {
    fn get(&self, url: &str) -> HttpExchange {
        let client = reqwest::blocking::Client::new();
        Self::exchange(client.get(url).send())
    }

    fn post(&self, url: &str, body: &str, content_type: &str) -> HttpExchange {
        let client = reqwest::blocking::Client::new();
        Self::exchange(
            client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body.to_string())
                .send(),
        )
    }
}

/// Executor for [`gantry_core::domain::pipeline::StepKind::Script`]
pub struct ScriptRunner {
    pool: Arc<VmPool>,
    http: Arc<dyn HttpBridge>,
}

impl ScriptRunner {
    pub fn new(pool: Arc<VmPool>, http: Arc<dyn HttpBridge>) -> Self {
        Self { pool, http }
    }
}

#[async_trait]
impl StepRunner for ScriptRunner {
    async fn run(
        &self,
        ctx: &StepContext,
        _work_dir: &Path,
        step: &Step,
        env: &SharedEnv,
        log: &Arc<JobLogger>,
    ) -> Result<()> {
        let StepConfig::Script(cfg) = &step.config else {
            bail!("script step is missing its script configuration");
        };

        let source = if step.no_env_render {
            cfg.source.clone()
        } else {
            env.render(&cfg.source)
        };

        let lua = self
            .pool
            .get()
            .context("failed to acquire a script interpreter")?;

        LogModule::new(Arc::new(JobLogSink { log: log.clone() }))
            .register(&lua)
            .context("failed to register the log bridge")?;
        EnvModule::new(Arc::new(SharedEnvBridge { env: env.clone() }))
            .register(&lua)
            .context("failed to register the env bridge")?;
        HttpModule::new(self.http.clone())
            .register(&lua)
            .context("failed to register the http bridge")?;
        JsonModule
            .register(&lua)
            .context("failed to register the json bridge")?;

        let handle = tokio::task::spawn_blocking(move || {
            let result = lua.load(&source).exec();
            (lua, result)
        });

        tokio::select! {
            _ = ctx.done() => {
                // the VM keeps running in the background and is dropped
                // with the detached task instead of returning to the pool
                Err(ctx.interrupt_error()).context("script execution interrupted")
            }
            joined = handle => {
                let (lua, result) = joined.context("script execution task failed")?;
                match result {
                    Ok(()) => {
                        self.pool.put(lua);
                        Ok(())
                    }
                    Err(e) => Err(anyhow::Error::new(e).context("script execution failed")),
                }
            }
        }
    }
}
