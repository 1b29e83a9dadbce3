//! Error taxonomy for provisioning
//!
//! Every error aborts the run. Nothing here is retried and nothing that was
//! already applied to the host is rolled back.

use std::path::PathBuf;

use thiserror::Error;

/// Host-level failure: filesystem, process spawn, or network transport
#[derive(Debug, Error)]
pub enum HostError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },
}

/// The host cannot be provisioned at all
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("must be run as root")]
    NotRoot,

    #[error("required tool '{0}' not found in PATH")]
    MissingTool(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Artifact download and extraction failures
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {reason}")]
    NetworkError { url: String, reason: String },

    #[error("cannot extract '{entry}' from archive: {reason}")]
    ExtractError { entry: String, reason: String },

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Agent configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required configuration value '{0}' is empty")]
    MissingRequiredVar(&'static str),

    #[error("no IPv4 address bound to interface {0}")]
    InterfaceNotFound(String),

    #[error("failed to render template: {0}")]
    Template(#[from] tera::Error),

    #[error("cannot load configuration template from {url}: {reason}")]
    RemoteTemplate { url: String, reason: String },

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Service manager failures
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("`{command}` exited with {code}: {stderr}")]
    ManagerRejected {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Failure of a single installation step
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("`{command}` exited with {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Failure of a whole provisioning run
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("step {index}/{total} '{step}' failed")]
    Step {
        index: usize,
        total: usize,
        step: String,
        #[source]
        source: StepError,
    },
}

impl ProvisionError {
    /// The underlying step error, if the run failed inside a step
    pub fn step_error(&self) -> Option<&StepError> {
        match self {
            Self::Step { source, .. } => Some(source),
            Self::Precondition(_) | Self::Config(_) => None,
        }
    }
}
