//! Systemd service management steps

use super::{CloudInitFragment, Step, StepResult, WriteFile};
use crate::error::StepError;
use crate::host::Host;
use crate::service::{Lifecycle, ServiceRegistrar, ServiceUnitDescriptor, UNIT_MODE};

/// Install a unit file, then reload, enable and start the service
#[derive(Debug, Clone)]
pub struct RegisterService {
    pub unit: ServiceUnitDescriptor,
    description: String,
}

impl RegisterService {
    pub fn new(unit: ServiceUnitDescriptor) -> Self {
        let description = format!("Register service {}", unit.name);
        Self { unit, description }
    }

    fn unit_file(&self) -> WriteFile {
        WriteFile::new(&self.unit.path, &self.unit.content).with_mode(UNIT_MODE)
    }

    fn lifecycle_bash(&self) -> Vec<String> {
        let name = &self.unit.name;
        self.unit
            .lifecycle
            .iter()
            .map(|action| match action {
                Lifecycle::Reload => "systemctl daemon-reload".to_string(),
                Lifecycle::Enable => {
                    format!("systemctl is-enabled {name} >/dev/null 2>&1 || systemctl enable {name}")
                }
                Lifecycle::Start => {
                    format!("systemctl is-active {name} >/dev/null 2>&1 || systemctl start {name}")
                }
            })
            .collect()
    }
}

impl Step for RegisterService {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_cloud_init(&self) -> CloudInitFragment {
        let mut fragment = self.unit_file().to_cloud_init();
        fragment.runcmd.extend(self.lifecycle_bash());
        fragment
    }

    fn to_bash(&self) -> Vec<String> {
        let mut cmds = self.unit_file().to_bash();
        cmds.extend(self.lifecycle_bash());
        cmds
    }

    fn check_command(&self) -> Option<String> {
        let name = &self.unit.name;
        self.unit_file().check_command().map(|file| {
            format!(
                "{file} && systemctl is-enabled {name} >/dev/null 2>&1 && systemctl is-active {name} >/dev/null 2>&1"
            )
        })
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        Ok(ServiceRegistrar::new(host).is_registered(&self.unit)?)
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        ServiceRegistrar::new(host).register(&self.unit)?;
        Ok(())
    }

    fn execute(&self, host: &dyn Host) -> Result<StepResult, StepError> {
        Ok(ServiceRegistrar::new(host).register(&self.unit)?)
    }
}

/// Stop and disable a service, then remove its unit file
#[derive(Debug, Clone)]
pub struct DeregisterService {
    pub name: String,
    pub path: String,
    description: String,
}

impl DeregisterService {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let name = name.into();
        let description = format!("Deregister service {name}");
        Self {
            name,
            path: path.into(),
            description,
        }
    }
}

impl Step for DeregisterService {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_cloud_init(&self) -> CloudInitFragment {
        CloudInitFragment {
            runcmd: self.to_bash(),
            ..Default::default()
        }
    }

    fn to_bash(&self) -> Vec<String> {
        let name = &self.name;
        vec![
            format!("! systemctl is-active {name} >/dev/null 2>&1 || systemctl stop {name}"),
            format!("! systemctl is-enabled {name} >/dev/null 2>&1 || systemctl disable {name}"),
            format!("rm -f '{}'", self.path),
            "systemctl daemon-reload".into(),
        ]
    }

    fn check_command(&self) -> Option<String> {
        Some(format!(
            "[ ! -e '{}' ] && ! systemctl is-active {} >/dev/null 2>&1",
            self.path, self.name
        ))
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        Ok(ServiceRegistrar::new(host).is_deregistered(&self.name, &self.path)?)
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        ServiceRegistrar::new(host).deregister(&self.name, &self.path)?;
        Ok(())
    }

    fn execute(&self, host: &dyn Host) -> Result<StepResult, StepError> {
        Ok(ServiceRegistrar::new(host).deregister(&self.name, &self.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::UnitParams;

    fn step() -> RegisterService {
        RegisterService::new(
            ServiceUnitDescriptor::render(
                "nomad",
                "/etc/systemd/system/nomad.service",
                &UnitParams {
                    user: "nomad".into(),
                    binary: "/usr/local/bin/nomad".into(),
                    config_dir: "/etc/nomad.d".into(),
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_register_service_bash() {
        let bash = step().to_bash().join("\n");

        assert!(bash.contains("cat > '/etc/systemd/system/nomad.service'"));
        let reload = bash.find("systemctl daemon-reload").unwrap();
        let enable = bash.find("systemctl enable nomad").unwrap();
        let start = bash.find("systemctl start nomad").unwrap();
        assert!(reload < enable && enable < start);
    }

    #[test]
    fn test_register_service_cloud_init() {
        let fragment = step().to_cloud_init();
        assert_eq!(fragment.write_files.len(), 1);
        assert_eq!(fragment.write_files[0].permissions.as_deref(), Some("0644"));
        assert_eq!(fragment.runcmd.len(), 3);
    }

    #[test]
    fn test_deregister_check() {
        let step = DeregisterService::new("nomad", "/etc/systemd/system/nomad.service");
        assert_eq!(
            step.check_command().unwrap(),
            "[ ! -e '/etc/systemd/system/nomad.service' ] && ! systemctl is-active nomad >/dev/null 2>&1"
        );
    }
}
