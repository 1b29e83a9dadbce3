//! systemd service registration
//!
//! A [`ServiceUnitDescriptor`] carries the rendered unit file and the
//! `systemctl` commands that activate it. [`ServiceRegistrar`] writes the
//! unit only when its content changed and runs the lifecycle commands in
//! order, stopping at the first one the service manager rejects.

use std::path::Path;

use serde::Serialize;
use tera::{Context, Tera};
use tracing::{debug, info};

use crate::error::{ConfigError, ServiceError};
use crate::fetch::sha256_hex;
use crate::host::{Host, command_line};
use crate::steps::StepResult;

/// Built-in unit file template
pub const UNIT_TEMPLATE: &str = include_str!("../templates/nomad.service.tera");

/// Unit files are world-readable
pub const UNIT_MODE: u32 = 0o644;

/// A `systemctl` action run after the unit file is in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// `systemctl daemon-reload`
    Reload,
    /// `systemctl enable <unit>`
    Enable,
    /// `systemctl start <unit>`
    Start,
}

impl Lifecycle {
    pub fn args(self, unit: &str) -> Vec<&str> {
        match self {
            Self::Reload => vec!["daemon-reload"],
            Self::Enable => vec!["enable", unit],
            Self::Start => vec!["start", unit],
        }
    }
}

/// Values substituted into the unit template
#[derive(Debug, Clone, Serialize)]
pub struct UnitParams {
    pub user: String,
    pub binary: String,
    pub config_dir: String,
}

/// A rendered unit and how to bring it up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnitDescriptor {
    /// Unit name without the `.service` suffix
    pub name: String,
    pub path: String,
    pub content: String,
    pub lifecycle: Vec<Lifecycle>,
}

impl ServiceUnitDescriptor {
    /// Render the built-in unit template
    pub fn render(
        name: impl Into<String>,
        path: impl Into<String>,
        params: &UnitParams,
    ) -> Result<Self, ConfigError> {
        let context = Context::from_serialize(params)?;
        let content = Tera::one_off(UNIT_TEMPLATE, &context, false)?;
        Ok(Self {
            name: name.into(),
            path: path.into(),
            content,
            lifecycle: vec![Lifecycle::Reload, Lifecycle::Enable, Lifecycle::Start],
        })
    }
}

/// Registers and deregisters units with systemd through a [`Host`]
pub struct ServiceRegistrar<'h> {
    host: &'h dyn Host,
}

impl<'h> ServiceRegistrar<'h> {
    pub fn new(host: &'h dyn Host) -> Self {
        Self { host }
    }

    fn systemctl(&self, args: &[&str]) -> Result<(), ServiceError> {
        let output = self.host.run("systemctl", args)?;
        if output.success() {
            Ok(())
        } else {
            Err(ServiceError::ManagerRejected {
                command: command_line("systemctl", args),
                code: output.code,
                stderr: output.stderr,
            })
        }
    }

    pub fn is_active(&self, name: &str) -> Result<bool, ServiceError> {
        Ok(self.host.run("systemctl", &["is-active", name])?.success())
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool, ServiceError> {
        Ok(self.host.run("systemctl", &["is-enabled", name])?.success())
    }

    fn unit_current(&self, unit: &ServiceUnitDescriptor) -> Result<bool, ServiceError> {
        let path = Path::new(&unit.path);
        let meta = self.host.metadata(path)?;
        if !meta.is_some_and(|m| !m.is_dir && m.matches(UNIT_MODE, None)) {
            return Ok(false);
        }
        let current = self.host.read_file(path)?;
        Ok(current.is_some_and(|bytes| sha256_hex(&bytes) == sha256_hex(unit.content.as_bytes())))
    }

    /// Unit file matches and the service is enabled and running
    pub fn is_registered(&self, unit: &ServiceUnitDescriptor) -> Result<bool, ServiceError> {
        Ok(self.unit_current(unit)? && self.is_enabled(&unit.name)? && self.is_active(&unit.name)?)
    }

    /// Unit file is gone and the service is not running
    pub fn is_deregistered(&self, name: &str, path: &str) -> Result<bool, ServiceError> {
        Ok(!self.host.exists(Path::new(path)) && !self.is_active(name)?)
    }

    /// Install the unit and run its lifecycle commands
    pub fn register(&self, unit: &ServiceUnitDescriptor) -> Result<StepResult, ServiceError> {
        if self.is_registered(unit)? {
            debug!(unit = %unit.name, "service already registered");
            return Ok(StepResult::AlreadySatisfied);
        }

        if self.unit_current(unit)? {
            debug!(path = %unit.path, "unit file unchanged");
        } else {
            self.host
                .write_file(Path::new(&unit.path), unit.content.as_bytes(), UNIT_MODE)?;
            info!(path = %unit.path, "wrote unit file");
        }

        for action in &unit.lifecycle {
            self.systemctl(&action.args(&unit.name))?;
        }
        info!(unit = %unit.name, "service registered");
        Ok(StepResult::Applied)
    }

    /// Stop and disable the service, then remove its unit file
    pub fn deregister(&self, name: &str, path: &str) -> Result<StepResult, ServiceError> {
        if self.is_deregistered(name, path)? {
            return Ok(StepResult::AlreadySatisfied);
        }

        if self.is_active(name)? {
            self.systemctl(&["stop", name])?;
        }
        if self.is_enabled(name)? {
            self.systemctl(&["disable", name])?;
        }
        if self.host.remove(Path::new(path))? {
            self.systemctl(&["daemon-reload"])?;
        }
        info!(unit = %name, "service deregistered");
        Ok(StepResult::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    fn descriptor() -> ServiceUnitDescriptor {
        ServiceUnitDescriptor::render(
            "nomad",
            "/etc/systemd/system/nomad.service",
            &UnitParams {
                user: "nomad".into(),
                binary: "/usr/local/bin/nomad".into(),
                config_dir: "/etc/nomad.d".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_render_unit() {
        let unit = descriptor();
        assert!(unit.content.contains("User=nomad"));
        assert!(unit.content.contains("ExecStart=/usr/local/bin/nomad agent -config /etc/nomad.d"));
        assert!(unit.content.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn test_register_runs_lifecycle_in_order() {
        let host = MemoryHost::new();
        let registrar = ServiceRegistrar::new(&host);

        assert_eq!(registrar.register(&descriptor()).unwrap(), StepResult::Applied);

        let systemctl: Vec<_> = host
            .commands()
            .into_iter()
            .filter(|c| c.starts_with("systemctl ") && !c.contains(" is-"))
            .collect();
        assert_eq!(
            systemctl,
            vec![
                "systemctl daemon-reload",
                "systemctl enable nomad",
                "systemctl start nomad"
            ]
        );
        assert!(host.is_enabled("nomad"));
        assert!(host.is_active("nomad"));
        assert_eq!(host.mode("/etc/systemd/system/nomad.service"), Some(0o644));
    }

    #[test]
    fn test_register_twice_is_satisfied() {
        let host = MemoryHost::new();
        let registrar = ServiceRegistrar::new(&host);

        registrar.register(&descriptor()).unwrap();
        assert_eq!(
            registrar.register(&descriptor()).unwrap(),
            StepResult::AlreadySatisfied
        );
    }

    #[test]
    fn test_register_rewrites_unit_with_wrong_mode() {
        let host = MemoryHost::new();
        let registrar = ServiceRegistrar::new(&host);
        let unit = descriptor();
        registrar.register(&unit).unwrap();

        host.write_file(Path::new(&unit.path), unit.content.as_bytes(), 0o600)
            .unwrap();

        assert!(!registrar.is_registered(&unit).unwrap());
        assert_eq!(registrar.register(&unit).unwrap(), StepResult::Applied);
        assert_eq!(host.mode(&unit.path), Some(UNIT_MODE));
    }

    #[test]
    fn test_register_rejected() {
        let host = MemoryHost::new().reject("systemctl enable nomad");
        let registrar = ServiceRegistrar::new(&host);

        let err = registrar.register(&descriptor()).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::ManagerRejected { ref command, code: 1, .. } if command == "systemctl enable nomad"
        ));
        assert!(!host.is_active("nomad"));
    }

    #[test]
    fn test_deregister() {
        let host = MemoryHost::new();
        let registrar = ServiceRegistrar::new(&host);
        let unit = descriptor();

        assert_eq!(
            registrar.deregister(&unit.name, &unit.path).unwrap(),
            StepResult::AlreadySatisfied
        );

        registrar.register(&unit).unwrap();
        assert_eq!(
            registrar.deregister(&unit.name, &unit.path).unwrap(),
            StepResult::Applied
        );
        assert!(!host.is_active("nomad"));
        assert!(!host.is_enabled("nomad"));
        assert!(!host.exists(Path::new(&unit.path)));
    }
}
