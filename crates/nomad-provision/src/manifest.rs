//! Installation manifest - complete step sequence

use crate::config::{DEFAULT_CNI_DIR, InstallSpec};
use crate::error::ConfigError;
use crate::service::{ServiceUnitDescriptor, UnitParams};
use crate::steps::{
    BUNDLE_STAMP, DeregisterService, EnsureDirectory, EnsureUser, InstallBinary, InstallBundle,
    RegisterService, RemovePath, RemoveUser, Step, WriteAgentConfig,
};

/// Sudoers rule for the service user when sudo is granted
pub const SUDO_RULE: &str = "ALL=(ALL) NOPASSWD:ALL";

/// Ordered list of steps applied to one host
pub struct Manifest {
    /// Name shown in rendered scripts
    pub name: String,
    /// Ordered list of installation steps
    pub steps: Vec<Box<dyn Step>>,
}

impl Manifest {
    /// Create a new empty manifest
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: vec![],
        }
    }

    /// Add a step to the manifest
    pub fn add_step<S: Step + 'static>(&mut self, step: S) {
        self.steps.push(Box::new(step));
    }

    /// Add a step fluently
    pub fn with_step<S: Step + 'static>(mut self, step: S) -> Self {
        self.add_step(step);
        self
    }

    /// The unit descriptor for a spec
    pub fn unit_descriptor(spec: &InstallSpec) -> Result<ServiceUnitDescriptor, ConfigError> {
        ServiceUnitDescriptor::render(
            &spec.service_name,
            spec.unit_path(),
            &UnitParams {
                user: spec.service_user.clone(),
                binary: spec.binary_path.clone(),
                config_dir: spec.config_dir.clone(),
            },
        )
    }

    /// Install, configure and register a Nomad client agent
    ///
    /// In order:
    /// - With `replace_existing`, the running agent is stopped and its unit
    ///   removed first
    /// - Nomad binary (and CNI plugins when requested)
    /// - Service user, optionally with passwordless sudo
    /// - Data and configuration directories
    /// - Agent configuration for the detected advertise address
    /// - systemd unit, reloaded, enabled and started
    pub fn install(spec: &InstallSpec) -> Result<Self, ConfigError> {
        let mut manifest = Self::new(format!("nomad {} client", spec.version));

        if spec.replace_existing {
            manifest.add_step(DeregisterService::new(&spec.service_name, spec.unit_path()));
        }

        manifest.add_step(
            InstallBinary::new(&spec.binary_path, &spec.version, &spec.url_template)
                .with_arch(&spec.arch)
                .replace_existing(spec.replace_existing),
        );

        if let Some(cni) = &spec.cni {
            manifest.add_step(
                InstallBundle::new(&cni.dir, &cni.version, &cni.url_template).with_arch(&spec.arch),
            );
        }

        let user = EnsureUser::new(&spec.service_user, &spec.data_dir);
        manifest.add_step(if spec.grant_sudo {
            user.with_sudo(SUDO_RULE)
        } else {
            user
        });

        manifest.add_step(
            EnsureDirectory::new(&spec.data_dir)
                .with_mode(0o700)
                .with_owner(spec.owner()),
        );
        manifest.add_step(
            EnsureDirectory::new(&spec.config_dir)
                .with_mode(0o700)
                .with_owner(spec.owner()),
        );

        manifest.add_step(
            WriteAgentConfig::new(
                spec.config_file(),
                spec.config_vars(""),
                spec.config_source.clone(),
            )
            .with_owner(spec.owner()),
        );

        manifest.add_step(RegisterService::new(Self::unit_descriptor(spec)?));

        Ok(manifest)
    }

    /// Stop the agent and remove what [`Manifest::install`] put in place.
    ///
    /// The data directory, CNI plugins and service user are only removed
    /// with `purge`.
    pub fn uninstall(spec: &InstallSpec, purge: bool) -> Self {
        let mut manifest = Self::new("nomad client removal")
            .with_step(DeregisterService::new(&spec.service_name, spec.unit_path()))
            .with_step(RemovePath::new(&spec.binary_path))
            .with_step(RemovePath::new(&spec.config_dir));

        if purge {
            manifest.add_step(RemovePath::new(&spec.data_dir));
            // Plugins installed by an earlier run carry a version stamp
            let cni_dir = spec.cni.as_ref().map_or(DEFAULT_CNI_DIR, |cni| cni.dir.as_str());
            manifest.add_step(RemovePath::new(cni_dir).guarded_by(BUNDLE_STAMP));
            manifest.add_step(RemoveUser::new(&spec.service_user));
        }

        manifest
    }

    /// Get all step descriptions
    pub fn descriptions(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.description()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CniPlugins;

    #[test]
    fn test_install_order() {
        let manifest = Manifest::install(&InstallSpec::test_spec()).unwrap();

        assert_eq!(
            manifest.descriptions(),
            vec![
                "Install /usr/local/bin/nomad v1.10.0",
                "Ensure user nomad exists",
                "Ensure directory /opt/nomad",
                "Ensure directory /etc/nomad.d",
                "Render agent configuration /etc/nomad.d/nomad.hcl",
                "Register service nomad",
            ]
        );
    }

    #[test]
    fn test_install_with_cni() {
        let spec = InstallSpec {
            cni: Some(CniPlugins::default()),
            ..InstallSpec::test_spec()
        };
        let manifest = Manifest::install(&spec).unwrap();

        assert_eq!(manifest.steps.len(), 7);
        assert_eq!(
            manifest.steps[1].description(),
            "Install bundle v1.5.1 into /opt/cni/bin"
        );
    }

    #[test]
    fn test_sudo_is_opt_in() {
        let spec = InstallSpec::test_spec();
        let bash = Manifest::install(&spec).unwrap().steps[1].to_bash().join("\n");
        assert!(!bash.contains("sudoers"));

        let spec = InstallSpec {
            grant_sudo: true,
            ..spec
        };
        let bash = Manifest::install(&spec).unwrap().steps[1].to_bash().join("\n");
        assert!(bash.contains("/etc/sudoers.d/nomad"));
    }

    #[test]
    fn test_replace_stops_previous_agent_first() {
        let spec = InstallSpec {
            replace_existing: true,
            ..InstallSpec::test_spec()
        };
        let manifest = Manifest::install(&spec).unwrap();

        assert_eq!(manifest.steps.len(), 7);
        assert_eq!(manifest.descriptions()[0], "Deregister service nomad");
        assert_eq!(manifest.descriptions().last(), Some(&"Register service nomad"));
    }

    #[test]
    fn test_uninstall_keeps_data_without_purge() {
        let spec = InstallSpec::test_spec();

        let manifest = Manifest::uninstall(&spec, false);
        assert_eq!(manifest.steps.len(), 3);
        assert!(!manifest.descriptions().contains(&"Remove /opt/nomad"));

        let manifest = Manifest::uninstall(&spec, true);
        assert!(manifest.descriptions().contains(&"Remove /opt/nomad"));
        assert_eq!(manifest.descriptions().last(), Some(&"Remove user nomad"));
    }

    #[test]
    fn test_purge_covers_default_cni_dir() {
        let spec = InstallSpec::test_spec();
        assert!(spec.cni.is_none());

        let manifest = Manifest::uninstall(&spec, true);
        assert!(
            manifest
                .descriptions()
                .contains(&"Remove /opt/cni/bin if it contains .version")
        );

        let spec = InstallSpec {
            cni: Some(CniPlugins {
                dir: "/usr/libexec/cni".into(),
                ..CniPlugins::default()
            }),
            ..spec
        };
        let manifest = Manifest::uninstall(&spec, true);
        assert!(
            manifest
                .descriptions()
                .contains(&"Remove /usr/libexec/cni if it contains .version")
        );
    }
}
