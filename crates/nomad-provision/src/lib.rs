//! Nomad Provision - Client Bootstrap Library
//!
//! This crate installs a Nomad client agent on a Linux host, configures it
//! to join a server, and registers it with systemd. Each part of the
//! process is an idempotent step that can be applied directly to a host or
//! rendered to either cloud-init YAML or an executable bash script.
//!
//! # Architecture
//!
//! - [`Host`] trait: every side effect, with [`SystemHost`] for the real
//!   machine and [`MemoryHost`] for tests
//! - [`Step`] trait: Common interface for all installation steps
//! - [`steps`] module: Concrete step implementations (binaries, users, files, etc.)
//! - [`ArtifactFetcher`], [`ConfigRenderer`], [`ServiceRegistrar`]: the
//!   building blocks the steps use
//! - [`Manifest`]: Ordered step sequence for install or uninstall
//! - [`Provisioner`]: Applies a manifest, stopping at the first failure
//! - [`render`] module: Output renderers (cloud-init, bash)
//!
//! # Example
//!
//! ```ignore
//! use nomad_provision::{InstallSpec, Provisioner, SystemHost};
//!
//! let spec = InstallSpec::builder()
//!     .server_address("10.0.0.1")
//!     .interface("wt0")
//!     .build();
//!
//! let host = SystemHost::new();
//! Provisioner::new(&host).run(&spec)?;
//! ```

pub mod agent_config;
pub mod config;
pub mod error;
pub mod fetch;
pub mod host;
pub mod manifest;
pub mod provisioner;
pub mod render;
pub mod service;
pub mod steps;

pub use agent_config::{ConfigRenderer, ConfigSource, ConfigVars, PluginToggles};
pub use config::{CniPlugins, InstallSpec};
pub use error::{
    ConfigError, FetchError, HostError, PreconditionError, ProvisionError, ServiceError, StepError,
};
pub use fetch::ArtifactFetcher;
pub use host::{CommandOutput, Host, MemoryHost, PathMeta, SystemHost};
pub use manifest::Manifest;
pub use provisioner::{HostState, Provisioner, Reporter};
pub use render::{BashRenderer, CloudInitRenderer, RenderError, Renderer, ScriptFormat};
pub use service::{ServiceRegistrar, ServiceUnitDescriptor};
pub use steps::{Step, StepResult};
