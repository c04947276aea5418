//! The build environment threaded across a pipeline's steps
//!
//! [`ProcessCtx`] is the inter-step communication channel: step executors
//! render their configuration through it, scripts read and write it, and a
//! step can write the well-known status variables to end the pipeline
//! early. Steps execute strictly sequentially, so there is one logical
//! writer at a time; [`SharedEnv`] wraps the context for the concurrent
//! snapshot reads the progress table performs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

/// Variable holding the build identifier, seeded before the first step
pub const BUILD_ID_VAR: &str = "CI_BUILD_ID";
/// Variable a step writes to signal a terminal outcome
pub const BUILD_STATUS_VAR: &str = "CI_BUILD_STATUS";
/// Variable holding the reason accompanying a failed status
pub const BUILD_FAIL_REASON_VAR: &str = "CI_BUILD_FAIL_REASON";

/// `CI_BUILD_STATUS` value meaning "succeed now, skip remaining steps"
pub const BUILD_SUCCESS: &str = "success";
/// `CI_BUILD_STATUS` value meaning "the pipeline has failed"
pub const BUILD_FAILED: &str = "failed";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([a-zA-Z][_a-zA-Z0-9]{0,50})\}").expect("placeholder regex"));

/// Mutable string-to-string environment with template rendering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessCtx {
    env: HashMap<String, String>,
}

impl ProcessCtx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the given entries, overwriting existing keys
    pub fn append(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        for (k, v) in entries {
            self.env.insert(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Clone of the current environment, for progress snapshots
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.env.clone()
    }

    /// Whether a step has written the explicit-failure signal
    pub fn pipeline_failed(&self) -> bool {
        self.get(BUILD_STATUS_VAR) == Some(BUILD_FAILED)
    }

    /// Whether a step has written the explicit early-success signal
    pub fn pipeline_succeed(&self) -> bool {
        self.get(BUILD_STATUS_VAR) == Some(BUILD_SUCCESS)
    }

    /// Marks the pipeline as failed with the given reason
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.env
            .insert(BUILD_STATUS_VAR.to_string(), BUILD_FAILED.to_string());
        self.env
            .insert(BUILD_FAIL_REASON_VAR.to_string(), reason.into());
    }

    /// The reason recorded by [`ProcessCtx::fail`], empty if none
    pub fn fail_reason(&self) -> String {
        self.get(BUILD_FAIL_REASON_VAR).unwrap_or("").to_string()
    }

    /// Substitutes `${NAME}` placeholders with environment values
    ///
    /// `NAME` must match `[a-zA-Z][_a-zA-Z0-9]{0,50}`. Unknown names and
    /// malformed placeholders are left verbatim.
    pub fn render(&self, input: &str) -> String {
        if input.is_empty() {
            return String::new();
        }

        PLACEHOLDER
            .replace_all(input, |caps: &regex::Captures<'_>| {
                match self.env.get(&caps[1]) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Shared handle to a pipeline's [`ProcessCtx`]
///
/// Steps mutate through it one at a time; progress queries take snapshots
/// concurrently.
#[derive(Debug, Clone, Default)]
pub struct SharedEnv {
    inner: Arc<Mutex<ProcessCtx>>,
}

impl SharedEnv {
    pub fn new(ctx: ProcessCtx) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ctx)),
        }
    }

    pub fn append(&self, entries: impl IntoIterator<Item = (String, String)>) {
        self.inner.lock().expect("env lock").append(entries);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("env lock")
            .get(key)
            .map(str::to_string)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().expect("env lock").set(key, value);
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().expect("env lock").snapshot()
    }

    pub fn pipeline_failed(&self) -> bool {
        self.inner.lock().expect("env lock").pipeline_failed()
    }

    pub fn pipeline_succeed(&self) -> bool {
        self.inner.lock().expect("env lock").pipeline_succeed()
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.inner.lock().expect("env lock").fail(reason);
    }

    pub fn fail_reason(&self) -> String {
        self.inner.lock().expect("env lock").fail_reason()
    }

    pub fn render(&self, input: &str) -> String {
        self.inner.lock().expect("env lock").render(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(entries: &[(&str, &str)]) -> ProcessCtx {
        let mut ctx = ProcessCtx::new();
        ctx.append(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        ctx
    }

    #[test]
    fn test_render_substitutes_known_names() {
        let ctx = ctx_with(&[("FOO", "bar")]);
        assert_eq!(ctx.render("${FOO}"), "bar");
        assert_eq!(ctx.render("pre-${FOO}-post"), "pre-bar-post");
    }

    #[test]
    fn test_render_leaves_unknown_names_verbatim() {
        let ctx = ctx_with(&[("FOO", "bar")]);
        assert_eq!(ctx.render("${MISSING}"), "${MISSING}");
        assert_eq!(ctx.render("${FOO} ${MISSING}"), "bar ${MISSING}");
    }

    #[test]
    fn test_render_leaves_malformed_placeholders_untouched() {
        let ctx = ctx_with(&[("FOO", "bar"), ("1abc", "nope")]);
        assert_eq!(ctx.render("${}"), "${}");
        assert_eq!(ctx.render("${1abc}"), "${1abc}");
        assert_eq!(ctx.render("$FOO"), "$FOO");
        assert_eq!(ctx.render("{FOO}"), "{FOO}");
    }

    #[test]
    fn test_render_rejects_overlong_names() {
        // 51 characters after the leading letter is the limit
        let ok_name = format!("A{}", "b".repeat(50));
        let long_name = format!("A{}", "b".repeat(51));

        let mut ctx = ProcessCtx::new();
        ctx.set(ok_name.clone(), "v1");
        ctx.set(long_name.clone(), "v2");

        assert_eq!(ctx.render(&format!("${{{ok_name}}}")), "v1");
        let long_placeholder = format!("${{{long_name}}}");
        assert_eq!(ctx.render(&long_placeholder), long_placeholder);
    }

    #[test]
    fn test_render_empty_input() {
        let ctx = ctx_with(&[("FOO", "bar")]);
        assert_eq!(ctx.render(""), "");
    }

    #[test]
    fn test_append_overwrites() {
        let mut ctx = ctx_with(&[("A", "1")]);
        ctx.append([("A".to_string(), "2".to_string())]);
        assert_eq!(ctx.get("A"), Some("2"));
    }

    #[test]
    fn test_fail_sets_status_and_reason() {
        let mut ctx = ProcessCtx::new();
        assert!(!ctx.pipeline_failed());
        assert!(!ctx.pipeline_succeed());

        ctx.fail("bad input");
        assert!(ctx.pipeline_failed());
        assert!(!ctx.pipeline_succeed());
        assert_eq!(ctx.fail_reason(), "bad input");
    }

    #[test]
    fn test_explicit_success_signal() {
        let mut ctx = ProcessCtx::new();
        ctx.set(BUILD_STATUS_VAR, BUILD_SUCCESS);
        assert!(ctx.pipeline_succeed());
        assert!(!ctx.pipeline_failed());
    }

    #[test]
    fn test_shared_env_roundtrip() {
        let env = SharedEnv::new(ProcessCtx::new());
        env.set("KEY", "value");
        assert_eq!(env.get("KEY"), Some("value".to_string()));
        assert_eq!(env.render("${KEY}"), "value");

        let snap = env.snapshot();
        assert_eq!(snap.get("KEY").map(String::as_str), Some("value"));
    }
}
