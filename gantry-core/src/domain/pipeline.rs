//! Pipeline and step definitions
//!
//! A [`Pipeline`] is the unit of submission: an identity, a parameter map
//! that seeds the build environment, and an ordered list of typed
//! [`Step`]s. Pipelines are immutable once submitted; the executor only
//! reads them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A user-submitted build job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Globally unique identity, assigned by the submitter before enqueue
    pub uid: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Initial parameters merged into the build environment
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Steps, executed strictly in declaration order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One unit of pipeline work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub uid: String,
    pub kind: StepKind,
    /// When set, the step's configuration strings are passed to the
    /// executor verbatim, skipping `${NAME}` rendering
    #[serde(default)]
    pub no_env_render: bool,
    pub config: StepConfig,
}

/// Closed set of step kinds; the processor's dispatch table is keyed by it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    SourceCheckout,
    ContainerShell,
    ImageBuild,
    Script,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepKind::SourceCheckout => "SourceCheckout",
            StepKind::ContainerShell => "ContainerShell",
            StepKind::ImageBuild => "ImageBuild",
            StepKind::Script => "Script",
        };
        f.write_str(name)
    }
}

/// Type-specific step configuration payload
///
/// The payload variant is expected to match the step's `kind`; executors
/// report a mismatch as an immediate step error rather than panicking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepConfig {
    Checkout(CheckoutConfig),
    Shell(ShellConfig),
    ImageBuild(ImageBuildConfig),
    Script(ScriptConfig),
}

/// Source-checkout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutConfig {
    pub vcs: VcsKind,
    /// Clone URL
    pub address: String,
    /// Single branch to check out
    pub branch: String,
    #[serde(default)]
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VcsKind {
    Git,
}

impl std::fmt::Display for VcsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VcsKind::Git => f.write_str("git"),
        }
    }
}

/// Checkout credential; unused fields stay empty
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    pub kind: CredentialKind,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub private_key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialKind {
    #[default]
    None,
    UserPassword,
    PrivateKey,
    BearerToken,
}

/// Containerized shell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Script body, wrapped with a shell preamble before execution
    pub script: String,
    /// Image the script runs in
    pub image: String,
    #[serde(default)]
    pub pull_policy: ImagePullPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    Never,
    Always,
    /// Pull only when no local image matches the reference
    #[default]
    IfNotPresent,
}

/// Image-build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBuildConfig {
    /// Dockerfile content, rendered then staged into the build context
    pub dockerfile: String,
    /// Tag applied to the built image
    pub target_image: String,
    #[serde(default)]
    pub push_after_build: bool,
}

/// Embedded-script configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub source: String,
}
