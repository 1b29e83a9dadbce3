//! Applying manifests to a host
//!
//! A run checks its preconditions, then executes the manifest's steps in
//! order. The first failing step aborts the run; later steps are never
//! attempted and earlier ones are not rolled back.

use std::fmt;
use std::path::Path;

use tracing::{debug, error, info, info_span};

use crate::agent_config::detect_advertise_address;
use crate::config::InstallSpec;
use crate::error::{HostError, PreconditionError, ProvisionError};
use crate::host::Host;
use crate::manifest::Manifest;
use crate::steps::StepResult;

/// Tools an install needs on `PATH`
pub const INSTALL_TOOLS: [&str; 3] = ["systemctl", "useradd", "ip"];

/// Tools an uninstall needs on `PATH`
pub const UNINSTALL_TOOLS: [&str; 1] = ["systemctl"];

/// Where a host is in the install lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostState {
    Absent,
    Installed,
    Configured,
    Registered,
    Running,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absent => "absent",
            Self::Installed => "installed",
            Self::Configured => "configured",
            Self::Registered => "registered",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// Observes a run step by step
pub trait Reporter {
    fn step_started(&mut self, _index: usize, _total: usize, _description: &str) {}

    fn step_finished(
        &mut self,
        _index: usize,
        _total: usize,
        _description: &str,
        _result: &StepResult,
    ) {
    }
}

/// Reports nothing
impl Reporter for () {}

/// Runs manifests against a [`Host`]
pub struct Provisioner<'h> {
    host: &'h dyn Host,
}

impl<'h> Provisioner<'h> {
    pub fn new(host: &'h dyn Host) -> Self {
        Self { host }
    }

    fn require(&self, tools: &[&str]) -> Result<(), PreconditionError> {
        if !self.host.is_root()? {
            return Err(PreconditionError::NotRoot);
        }
        if let Some(missing) = tools.iter().find(|t| !self.host.has_tool(t)) {
            return Err(PreconditionError::MissingTool((*missing).to_string()));
        }
        Ok(())
    }

    /// Root privileges and the tools an install needs
    pub fn check_preconditions(&self) -> Result<(), PreconditionError> {
        self.require(&INSTALL_TOOLS)
    }

    /// Install, configure, register and start the agent.
    ///
    /// Fails with [`ConfigError::InterfaceNotFound`] before any step runs
    /// when the interface has no IPv4 address.
    ///
    /// [`ConfigError::InterfaceNotFound`]: crate::ConfigError::InterfaceNotFound
    pub fn run(&self, spec: &InstallSpec) -> Result<Vec<StepResult>, ProvisionError> {
        self.run_with(spec, &mut ())
    }

    pub fn run_with(
        &self,
        spec: &InstallSpec,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<StepResult>, ProvisionError> {
        self.check_preconditions()?;
        // Nothing is touched unless there is an address to advertise
        let address = detect_advertise_address(self.host, &spec.interface)?;
        let manifest = Manifest::install(spec)?;
        info!(
            version = %spec.version,
            server = %spec.server_address,
            advertise = %address,
            "installing nomad"
        );
        self.execute(&manifest, reporter)
    }

    /// Stop the agent and remove it. With `purge`, also remove its data
    /// directory and service user.
    pub fn uninstall(
        &self,
        spec: &InstallSpec,
        purge: bool,
    ) -> Result<Vec<StepResult>, ProvisionError> {
        self.uninstall_with(spec, purge, &mut ())
    }

    pub fn uninstall_with(
        &self,
        spec: &InstallSpec,
        purge: bool,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<StepResult>, ProvisionError> {
        self.require(&UNINSTALL_TOOLS)?;
        info!(purge, "uninstalling nomad");
        self.execute(&Manifest::uninstall(spec, purge), reporter)
    }

    /// Execute every step of a manifest in order, stopping at the first failure
    pub fn execute(
        &self,
        manifest: &Manifest,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<StepResult>, ProvisionError> {
        let total = manifest.steps.len();
        let mut results = Vec::with_capacity(total);

        for (i, step) in manifest.steps.iter().enumerate() {
            let index = i + 1;
            let description = step.description();
            let _span = info_span!("step", index, total).entered();

            reporter.step_started(index, total, description);
            match step.execute(self.host) {
                Ok(result) => {
                    debug!(step = description, result = ?result, "step finished");
                    reporter.step_finished(index, total, description, &result);
                    results.push(result);
                }
                Err(source) => {
                    error!(step = description, error = %source, "step failed");
                    reporter.step_finished(
                        index,
                        total,
                        description,
                        &StepResult::Failed(source.to_string()),
                    );
                    return Err(ProvisionError::Step {
                        index,
                        total,
                        step: description.to_string(),
                        source,
                    });
                }
            }
        }

        let applied = results.iter().filter(|r| **r == StepResult::Applied).count();
        info!(total, applied, "manifest complete");
        Ok(results)
    }

    /// Inspect how far along the lifecycle the host is
    pub fn state(&self, spec: &InstallSpec) -> Result<HostState, HostError> {
        let active = self
            .host
            .run("systemctl", &["is-active", &spec.service_name])?
            .success();
        let state = if active {
            HostState::Running
        } else if self.host.exists(Path::new(&spec.unit_path())) {
            HostState::Registered
        } else if self.host.exists(Path::new(&spec.config_file())) {
            HostState::Configured
        } else if self.host.exists(Path::new(&spec.binary_path)) {
            HostState::Installed
        } else {
            HostState::Absent
        };
        Ok(state)
    }
}
