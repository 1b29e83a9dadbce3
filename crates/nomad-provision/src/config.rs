//! Installation parameters for a Nomad client

use crate::agent_config::{ConfigSource, ConfigVars, PluginToggles};
use crate::fetch::host_arch;

/// Default Nomad release
pub const DEFAULT_VERSION: &str = "1.10.0";

/// Official release archive location
pub const DEFAULT_URL_TEMPLATE: &str =
    "https://releases.hashicorp.com/nomad/{version}/nomad_{version}_linux_{arch}.zip";

/// Default CNI plugins release
pub const DEFAULT_CNI_VERSION: &str = "1.5.1";

/// Official CNI plugins release location
pub const DEFAULT_CNI_URL_TEMPLATE: &str = "https://github.com/containernetworking/plugins/releases/download/v{version}/cni-plugins-linux-{arch}-v{version}.tgz";

/// Where Nomad looks for CNI plugins by default
pub const DEFAULT_CNI_DIR: &str = "/opt/cni/bin";

/// CNI reference plugins installed next to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CniPlugins {
    pub version: String,
    /// Download URL with `{version}` and `{arch}` placeholders
    pub url_template: String,
    pub dir: String,
}

impl Default for CniPlugins {
    fn default() -> Self {
        Self {
            version: DEFAULT_CNI_VERSION.into(),
            url_template: DEFAULT_CNI_URL_TEMPLATE.into(),
            dir: DEFAULT_CNI_DIR.into(),
        }
    }
}

/// Everything needed to install and register a Nomad client agent.
///
/// Built once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSpec {
    /// Nomad release, e.g. "1.10.0"
    pub version: String,
    /// Download URL with `{version}` and `{arch}` placeholders
    pub url_template: String,
    /// Architecture substituted into download URLs
    pub arch: String,
    pub binary_path: String,
    pub config_dir: String,
    pub data_dir: String,
    /// System user the agent runs as
    pub service_user: String,
    /// systemd unit name, without the `.service` suffix
    pub service_name: String,
    /// Interface whose IPv4 address is advertised
    pub interface: String,
    /// Address of the Nomad server the client joins
    pub server_address: String,
    pub datacenter: String,
    pub docker: bool,
    pub raw_exec: bool,
    pub cni: Option<CniPlugins>,
    pub config_source: ConfigSource,
    /// Grant the service user passwordless sudo
    pub grant_sudo: bool,
    /// Reinstall the binary even if the requested version is present
    pub replace_existing: bool,
}

impl Default for InstallSpec {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.into(),
            url_template: DEFAULT_URL_TEMPLATE.into(),
            arch: host_arch().into(),
            binary_path: "/usr/local/bin/nomad".into(),
            config_dir: "/etc/nomad.d".into(),
            data_dir: "/opt/nomad".into(),
            service_user: "nomad".into(),
            service_name: "nomad".into(),
            interface: "wt0".into(),
            server_address: String::new(),
            datacenter: "dc1".into(),
            docker: true,
            raw_exec: false,
            cni: None,
            config_source: ConfigSource::Inline,
            grant_sudo: false,
            replace_existing: false,
        }
    }
}

impl InstallSpec {
    /// Create a new spec builder
    pub fn builder() -> InstallSpecBuilder {
        InstallSpecBuilder::default()
    }

    /// Path of the rendered agent configuration
    pub fn config_file(&self) -> String {
        format!("{}/nomad.hcl", self.config_dir.trim_end_matches('/'))
    }

    /// Path of the systemd unit file
    pub fn unit_path(&self) -> String {
        format!("/etc/systemd/system/{}.service", self.service_name)
    }

    /// `user:group` owner string for the service user
    pub fn owner(&self) -> String {
        format!("{0}:{0}", self.service_user)
    }

    pub fn plugins(&self) -> PluginToggles {
        PluginToggles {
            docker: self.docker,
            raw_exec: self.raw_exec,
            cni_dir: self.cni.as_ref().map(|c| c.dir.clone()),
        }
    }

    /// Template variables, given the detected advertise address
    pub fn config_vars(&self, advertise_address: impl Into<String>) -> ConfigVars {
        ConfigVars {
            advertise_address: advertise_address.into(),
            server_address: self.server_address.clone(),
            datacenter: self.datacenter.clone(),
            data_dir: self.data_dir.clone(),
            interface: self.interface.clone(),
            plugins: self.plugins(),
        }
    }

    /// Create a test spec for unit tests
    #[cfg(test)]
    pub fn test_spec() -> Self {
        Self {
            arch: "amd64".into(),
            server_address: "10.0.0.1".into(),
            url_template: "https://releases.example.test/nomad/{version}/nomad_{arch}.zip".into(),
            ..Self::default()
        }
    }
}

/// Builder for [`InstallSpec`]
#[derive(Debug, Clone, Default)]
pub struct InstallSpecBuilder {
    spec: InstallSpec,
}

impl InstallSpecBuilder {
    /// Set the Nomad release
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.spec.version = version.into();
        self
    }

    /// Set the release URL template
    pub fn url_template(mut self, template: impl Into<String>) -> Self {
        self.spec.url_template = template.into();
        self
    }

    /// Set the target architecture
    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.spec.arch = arch.into();
        self
    }

    pub fn binary_path(mut self, path: impl Into<String>) -> Self {
        self.spec.binary_path = path.into();
        self
    }

    pub fn config_dir(mut self, path: impl Into<String>) -> Self {
        self.spec.config_dir = path.into();
        self
    }

    pub fn data_dir(mut self, path: impl Into<String>) -> Self {
        self.spec.data_dir = path.into();
        self
    }

    /// Set the service user
    pub fn service_user(mut self, user: impl Into<String>) -> Self {
        self.spec.service_user = user.into();
        self
    }

    /// Set the systemd unit name
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.spec.service_name = name.into();
        self
    }

    /// Set the advertised interface
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.spec.interface = interface.into();
        self
    }

    /// Set the server address to join
    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.spec.server_address = address.into();
        self
    }

    pub fn datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.spec.datacenter = datacenter.into();
        self
    }

    /// Enable or disable the docker driver
    pub fn docker(mut self, enabled: bool) -> Self {
        self.spec.docker = enabled;
        self
    }

    /// Enable or disable the raw_exec driver
    pub fn raw_exec(mut self, enabled: bool) -> Self {
        self.spec.raw_exec = enabled;
        self
    }

    /// Install CNI plugins
    pub fn cni(mut self, cni: CniPlugins) -> Self {
        self.spec.cni = Some(cni);
        self
    }

    /// Set where the agent configuration template comes from
    pub fn config_source(mut self, source: ConfigSource) -> Self {
        self.spec.config_source = source;
        self
    }

    /// Grant the service user passwordless sudo
    pub fn grant_sudo(mut self, grant: bool) -> Self {
        self.spec.grant_sudo = grant;
        self
    }

    /// Reinstall even if the requested version is present
    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.spec.replace_existing = replace;
        self
    }

    /// Finish building the [`InstallSpec`]
    pub fn build(self) -> InstallSpec {
        self.spec
    }
}
