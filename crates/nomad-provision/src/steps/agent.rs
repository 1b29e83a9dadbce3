//! Agent configuration step
//!
//! The advertise address is only known on the target machine, so it is
//! detected when the step runs: through the [`Host`] when applied
//! directly, or with `ip` when rendered to a script.

use tracing::info;

use super::{CloudInitFragment, Step, StepResult, WriteFile, octal};
use crate::agent_config::{
    AGENT_TEMPLATE, ConfigRenderer, ConfigSource, ConfigVars, detect_advertise_address,
};
use crate::error::{ConfigError, StepError};
use crate::host::Host;

/// Stand-in for the advertise address in rendered scripts
const ADDRESS_PLACEHOLDER: &str = "__NOMAD_ADVERTISE_ADDR__";

/// Escape text for an unquoted heredoc
fn escape_heredoc(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('$', "\\$")
        .replace('`', "\\`")
}

/// Escape a replacement value for `sed s|...|...|`
fn escape_sed(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace('&', "\\&")
        .replace('\'', "'\\''")
}

/// Detect the advertise address, render the agent configuration and write it
#[derive(Debug, Clone)]
pub struct WriteAgentConfig {
    pub path: String,
    /// Interface whose first IPv4 address is advertised
    pub interface: String,
    /// Template variables; the advertise address is filled in at run time
    pub vars: ConfigVars,
    pub source: ConfigSource,
    pub mode: u32,
    pub owner: Option<String>,
    description: String,
}

impl WriteAgentConfig {
    pub fn new(path: impl Into<String>, vars: ConfigVars, source: ConfigSource) -> Self {
        let path = path.into();
        let description = format!("Render agent configuration {path}");
        Self {
            path,
            interface: vars.interface.clone(),
            vars,
            source,
            mode: 0o600,
            owner: None,
            description,
        }
    }

    /// Set file owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Render the configuration for this host
    pub fn render(&self, host: &dyn Host) -> Result<String, ConfigError> {
        let advertise_address = detect_advertise_address(host, &self.interface)?;
        let template = self.source.load(host)?;
        let vars = ConfigVars {
            advertise_address,
            ..self.vars.clone()
        };
        ConfigRenderer::render(&template, &vars)
    }

    fn file(&self, content: String) -> WriteFile {
        let file = WriteFile::new(&self.path, content).with_mode(self.mode);
        match &self.owner {
            Some(owner) => file.with_owner(owner),
            None => file,
        }
    }

    fn detect_bash(&self) -> Vec<String> {
        vec![
            format!(
                "ADVERTISE_ADDR=$(ip -o -4 addr show dev '{}' 2>/dev/null | awk '{{print $4}}' | cut -d/ -f1 | head -n1 || true)",
                self.interface
            ),
            format!(
                "if [ -z \"$ADVERTISE_ADDR\" ]; then\n    echo 'no IPv4 address bound to interface {}' >&2\n    exit 1\nfi",
                self.interface
            ),
        ]
    }

    /// Commands leaving the rendered configuration in `$CONFIG_TMP/rendered`
    fn render_bash(&self) -> Vec<String> {
        match &self.source {
            ConfigSource::Inline => {
                let vars = ConfigVars {
                    advertise_address: ADDRESS_PLACEHOLDER.into(),
                    ..self.vars.clone()
                };
                let rendered = match ConfigRenderer::render(AGENT_TEMPLATE, &vars) {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        let message = e.to_string().replace('\'', "");
                        return vec![format!("echo '{message}' >&2"), "exit 1".into()];
                    }
                };
                let body = escape_heredoc(rendered.strip_suffix('\n').unwrap_or(&rendered))
                    .replace(ADDRESS_PLACEHOLDER, "${ADVERTISE_ADDR}");
                let delimiter = WriteFile::heredoc_delimiter(&body);
                vec![format!(
                    "cat > \"$CONFIG_TMP/rendered\" << {delimiter}\n{body}\n{delimiter}"
                )]
            }
            ConfigSource::Remote { archive_url, entry } => {
                let mut sed = vec!["-e \"s|{{ *advertise_address *}}|${ADVERTISE_ADDR}|g\"".to_string()];
                for (name, value) in [
                    ("server_address", &self.vars.server_address),
                    ("datacenter", &self.vars.datacenter),
                    ("data_dir", &self.vars.data_dir),
                    ("interface", &self.vars.interface),
                ] {
                    sed.push(format!("-e 's|{{{{ *{name} *}}}}|{}|g'", escape_sed(value)));
                }
                vec![
                    format!("curl -fsSL '{archive_url}' -o \"$CONFIG_TMP/source.zip\""),
                    format!("unzip -p \"$CONFIG_TMP/source.zip\" '*{entry}' > \"$CONFIG_TMP/template\""),
                    format!(
                        "sed {} \"$CONFIG_TMP/template\" > \"$CONFIG_TMP/rendered\"",
                        sed.join(" ")
                    ),
                ]
            }
        }
    }
}

impl Step for WriteAgentConfig {
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
        let mut cmds = self.detect_bash();
        cmds.push(format!("mkdir -p \"$(dirname '{}')\"", self.path));
        cmds.push("CONFIG_TMP=$(mktemp -d)".into());
        cmds.extend(self.render_bash());
        cmds.push(format!(
            "cmp -s \"$CONFIG_TMP/rendered\" '{path}' || install -m {mode} \"$CONFIG_TMP/rendered\" '{path}'",
            path = self.path,
            mode = octal(self.mode)
        ));
        cmds.push("rm -rf \"$CONFIG_TMP\"".into());
        if let Some(owner) = &self.owner {
            cmds.push(format!("chown {} '{}'", owner, self.path));
        }
        cmds
    }

    fn check_command(&self) -> Option<String> {
        // Depends on the address detected at run time
        None
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        let content = self.render(host)?;
        self.file(content).is_satisfied(host)
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        let content = self.render(host)?;
        self.file(content).apply(host)
    }

    fn execute(&self, host: &dyn Host) -> Result<StepResult, StepError> {
        let content = self.render(host)?;
        let result = self.file(content).execute(host)?;
        if result == StepResult::Applied {
            info!(path = %self.path, source = %self.source.describe(), "wrote agent configuration");
        }
        Ok(result)
    }
}
