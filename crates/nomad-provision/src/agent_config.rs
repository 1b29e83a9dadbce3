//! Agent configuration rendering
//!
//! The agent configuration is a Tera template rendered from a handful of
//! variables. The template comes either from the crate itself
//! ([`ConfigSource::Inline`]) or from a file inside a remote zip archive
//! ([`ConfigSource::Remote`]).

use serde::Serialize;
use tera::{Context, Tera};
use tracing::debug;

use crate::error::ConfigError;
use crate::fetch::extract_zip_entry;
use crate::host::Host;

/// Built-in agent configuration template
pub const AGENT_TEMPLATE: &str = include_str!("../templates/nomad.hcl.tera");

/// Which task drivers and network plugins the agent enables
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginToggles {
    pub docker: bool,
    pub raw_exec: bool,
    /// CNI plugin directory, if CNI plugins are installed
    pub cni_dir: Option<String>,
}

impl Default for PluginToggles {
    fn default() -> Self {
        Self {
            docker: true,
            raw_exec: false,
            cni_dir: None,
        }
    }
}

/// Variables substituted into the agent configuration template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigVars {
    pub advertise_address: String,
    pub server_address: String,
    pub datacenter: String,
    pub data_dir: String,
    pub interface: String,
    #[serde(flatten)]
    pub plugins: PluginToggles,
}

/// Renders agent configuration text
pub struct ConfigRenderer;

impl ConfigRenderer {
    /// Render `template` with `vars`.
    ///
    /// Pure: the same inputs always produce the same bytes.
    pub fn render(template: &str, vars: &ConfigVars) -> Result<String, ConfigError> {
        let required = [
            ("advertise_address", &vars.advertise_address),
            ("server_address", &vars.server_address),
            ("data_dir", &vars.data_dir),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ConfigError::MissingRequiredVar(*name));
        }

        let context = Context::from_serialize(vars)?;
        Ok(Tera::one_off(template, &context, false)?)
    }
}

/// Pick the advertise address from an interface's CIDR addresses:
/// the first one, with any `/prefix` suffix removed.
pub fn advertise_address_from(interface: &str, addrs: &[String]) -> Result<String, ConfigError> {
    addrs
        .iter()
        .map(|a| a.split('/').next().unwrap_or(a).trim())
        .find(|a| !a.is_empty())
        .map(String::from)
        .ok_or_else(|| ConfigError::InterfaceNotFound(interface.to_string()))
}

/// Detect the advertise address bound to `interface` on the host
pub fn detect_advertise_address(host: &dyn Host, interface: &str) -> Result<String, ConfigError> {
    let addrs = host.ipv4_addresses(interface)?;
    let addr = advertise_address_from(interface, &addrs)?;
    debug!(interface, addr = %addr, "detected advertise address");
    Ok(addr)
}

/// Where the agent configuration template comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// The template shipped with this crate
    #[default]
    Inline,
    /// A template file inside a zip archive, e.g. a repository export
    Remote {
        archive_url: String,
        /// Path of the template inside the archive
        entry: String,
    },
}

impl ConfigSource {
    /// Fetch the template text
    pub fn load(&self, host: &dyn Host) -> Result<String, ConfigError> {
        match self {
            Self::Inline => Ok(AGENT_TEMPLATE.to_string()),
            Self::Remote { archive_url, entry } => {
                let remote_error = |reason: String| ConfigError::RemoteTemplate {
                    url: archive_url.clone(),
                    reason,
                };
                let archive = host
                    .download(archive_url)
                    .map_err(|e| remote_error(e.to_string()))?;
                let bytes =
                    extract_zip_entry(&archive, entry).map_err(|e| remote_error(e.to_string()))?;
                String::from_utf8(bytes).map_err(|e| remote_error(e.to_string()))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Inline => "built-in template".into(),
            Self::Remote { archive_url, entry } => format!("{entry} from {archive_url}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::zip_archive;
    use crate::host::MemoryHost;

    fn vars() -> ConfigVars {
        ConfigVars {
            advertise_address: "10.0.0.5".into(),
            server_address: "10.0.0.1".into(),
            datacenter: "dc1".into(),
            data_dir: "/opt/nomad".into(),
            interface: "wt0".into(),
            plugins: PluginToggles::default(),
        }
    }

    #[test]
    fn test_render_advertise_and_servers() {
        let config = ConfigRenderer::render(AGENT_TEMPLATE, &vars()).unwrap();

        assert!(config.contains("advertise {\n  http = \"10.0.0.5:4646\""));
        assert!(config.contains("rpc = \"10.0.0.5:4647\""));
        assert!(config.contains("servers = [\"10.0.0.1\"]"));
        assert!(config.contains("network_interface = \"wt0\""));
        assert!(config.contains("plugin \"docker\""));
        assert!(!config.contains("raw_exec"));
        assert!(!config.contains("cni_path"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = ConfigRenderer::render(AGENT_TEMPLATE, &vars()).unwrap();
        let b = ConfigRenderer::render(AGENT_TEMPLATE, &vars()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_plugin_toggles() {
        let mut vars = vars();
        vars.plugins = PluginToggles {
            docker: false,
            raw_exec: true,
            cni_dir: Some("/opt/cni/bin".into()),
        };

        let config = ConfigRenderer::render(AGENT_TEMPLATE, &vars).unwrap();

        assert!(!config.contains("plugin \"docker\""));
        assert!(config.contains("plugin \"raw_exec\""));
        assert!(config.contains("cni_path = \"/opt/cni/bin\"\n}"));
    }

    #[test]
    fn test_render_missing_advertise_address() {
        let mut vars = vars();
        vars.advertise_address = String::new();

        let err = ConfigRenderer::render(AGENT_TEMPLATE, &vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredVar("advertise_address")));
    }

    #[test]
    fn test_render_missing_server_address() {
        let mut vars = vars();
        vars.server_address = "  ".into();

        let err = ConfigRenderer::render(AGENT_TEMPLATE, &vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredVar("server_address")));
    }

    #[test]
    fn test_advertise_address_strips_cidr() {
        let addrs = vec!["10.0.0.5/24".to_string(), "10.0.0.6/24".to_string()];
        assert_eq!(advertise_address_from("wt0", &addrs).unwrap(), "10.0.0.5");
        assert_eq!(
            advertise_address_from("wt0", &["192.168.1.2".to_string()]).unwrap(),
            "192.168.1.2"
        );
    }

    #[test]
    fn test_detect_interface_not_found() {
        let host = MemoryHost::new().with_interface("eth0", ["172.16.0.2/16"]);

        let err = detect_advertise_address(&host, "wt0").unwrap_err();
        assert!(matches!(err, ConfigError::InterfaceNotFound(ref i) if i == "wt0"));

        let host = MemoryHost::new().with_interface("wt0", Vec::<String>::new());
        assert!(matches!(
            detect_advertise_address(&host, "wt0"),
            Err(ConfigError::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn test_detect_is_stable() {
        let host = MemoryHost::new().with_interface("wt0", ["10.0.0.5/24"]);
        let first = detect_advertise_address(&host, "wt0").unwrap();
        let second = detect_advertise_address(&host, "wt0").unwrap();
        assert_eq!(first, "10.0.0.5");
        assert_eq!(first, second);
    }

    #[test]
    fn test_remote_source_loads_entry() {
        let archive = zip_archive(&[(
            "infra-main/nomad/client.hcl",
            b"servers = [\"{{ server_address }}\"]\n",
        )]);
        let host = MemoryHost::new().with_remote("https://example.test/main.zip", archive);
        let source = ConfigSource::Remote {
            archive_url: "https://example.test/main.zip".into(),
            entry: "nomad/client.hcl".into(),
        };

        let template = source.load(&host).unwrap();
        let config = ConfigRenderer::render(&template, &vars()).unwrap();
        assert_eq!(config, "servers = [\"10.0.0.1\"]\n");
    }

    #[test]
    fn test_remote_source_failure() {
        let host = MemoryHost::new();
        let source = ConfigSource::Remote {
            archive_url: "https://example.test/missing.zip".into(),
            entry: "nomad.hcl".into(),
        };
        assert!(matches!(
            source.load(&host),
            Err(ConfigError::RemoteTemplate { .. })
        ));
    }
}
