//! Installation step definitions
//!
//! Each step implements the [`Step`] trait: it can check and apply itself
//! against a [`Host`], and render to both cloud-init YAML fragments and
//! idempotent bash commands.

mod agent;
mod artifact;
mod directory;
mod file;
mod remove;
mod service;
mod user;

pub use agent::WriteAgentConfig;
pub use artifact::{BUNDLE_STAMP, InstallBinary, InstallBundle};
pub use directory::EnsureDirectory;
pub use file::WriteFile;
pub use remove::RemovePath;
pub use service::{DeregisterService, RegisterService};
pub use user::{EnsureUser, RemoveUser};

use serde::Serialize;

use crate::error::StepError;
use crate::host::{CommandOutput, Host, command_line};

/// Result of running a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// Step was already satisfied, nothing changed
    AlreadySatisfied,
    /// Step executed successfully
    Applied,
    /// Step failed
    Failed(String),
}

impl StepResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A single installation step
///
/// All steps must be:
/// - **Idempotent**: Safe to run multiple times
/// - **Describable**: Have a human-readable description
/// - **Renderable**: Can output both cloud-init YAML and bash
pub trait Step: Send + Sync {
    /// Human-readable description of what this step does
    fn description(&self) -> &str;

    /// Render as cloud-init YAML fragment
    fn to_cloud_init(&self) -> CloudInitFragment;

    /// Render as idempotent bash commands
    fn to_bash(&self) -> Vec<String>;

    /// Check command to determine if step is already satisfied.
    ///
    /// If `Some(cmd)` is returned and the command succeeds (exit 0),
    /// the step will be skipped. If `None`, the step always runs.
    fn check_command(&self) -> Option<String>;

    /// Whether the host already is in the state this step describes
    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError>;

    /// Bring the host into the state this step describes
    fn apply(&self, host: &dyn Host) -> Result<(), StepError>;

    /// Check, then apply if needed
    fn execute(&self, host: &dyn Host) -> Result<StepResult, StepError> {
        if self.is_satisfied(host)? {
            return Ok(StepResult::AlreadySatisfied);
        }
        self.apply(host)?;
        Ok(StepResult::Applied)
    }
}

/// Fragment that can be merged into a cloud-init config
#[derive(Debug, Default, Clone, Serialize)]
pub struct CloudInitFragment {
    /// Files to write
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_files: Vec<CloudInitFile>,

    /// Commands to run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runcmd: Vec<String>,
}

/// A file to write in cloud-init format
#[derive(Debug, Clone, Serialize)]
pub struct CloudInitFile {
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Run a command and fail the step on a non-zero exit code
pub(crate) fn run_checked(
    host: &dyn Host,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput, StepError> {
    let output = host.run(program, args)?;
    if output.success() {
        Ok(output)
    } else {
        Err(StepError::CommandFailed {
            command: command_line(program, args),
            code: output.code,
            stderr: output.stderr,
        })
    }
}

/// Octal mode as used by `chmod`/`install`
pub(crate) fn octal(mode: u32) -> String {
    format!("{mode:04o}")
}

/// Shell test that `path` has `mode` and, when given, `owner`.
/// `stat -c %a` prints the mode without leading zeros.
pub(crate) fn stat_check(path: &str, mode: u32, owner: Option<&str>) -> String {
    match owner {
        Some(owner) if owner.contains(':') => {
            format!("[ \"$(stat -c '%a %U:%G' '{path}')\" = '{mode:o} {owner}' ]")
        }
        Some(owner) => format!("[ \"$(stat -c '%a %U' '{path}')\" = '{mode:o} {owner}' ]"),
        None => format!("[ \"$(stat -c '%a' '{path}')\" = '{mode:o}' ]"),
    }
}
