//! Bash script renderer
//!
//! Every step is wrapped in its check command, so the script can be run
//! any number of times. In verbose mode each step prints a progress marker
//! of the form `NOMAD_STEP:ACTION:index:description`, where ACTION is one
//! of `START`, `DONE`, `SKIP` or `FAIL`; a final `NOMAD_STEP:COMPLETE:total`
//! marks a finished run.

use std::fmt::Write;

use crate::Manifest;

use super::Renderer;

/// Marker prefix for progress lines
pub const MARKER_PREFIX: &str = "NOMAD_STEP";

const COLORS: &str = r"GREEN='\033[0;32m'
YELLOW='\033[0;33m'
RED='\033[0;31m'
CYAN='\033[0;36m'
NC='\033[0m'";

/// Escape text for use inside double quotes
fn escape_double_quoted(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('`', "\\`")
}

/// Renders a manifest as an idempotent bash script
#[derive(Debug, Clone)]
pub struct BashRenderer {
    verbose: bool,
    color: bool,
}

impl Default for BashRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl BashRenderer {
    /// Quiet script with colored markers once verbose is enabled
    pub fn new() -> Self {
        Self {
            verbose: false,
            color: true,
        }
    }

    /// Emit progress markers
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Color progress markers
    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    fn marker(&self, color: &str, action: &str, payload: &str) -> String {
        let line = format!("{MARKER_PREFIX}:{action}:{payload}");
        if self.color {
            format!("echo -e \"${{{color}}}{line}${{NC}}\"")
        } else {
            format!("echo \"{line}\"")
        }
    }
}

impl Renderer for BashRenderer {
    type Output = String;
    type Error = std::fmt::Error;

    fn render(&self, manifest: &Manifest) -> Result<String, Self::Error> {
        let mut out = String::new();
        let total = manifest.steps.len();

        writeln!(out, "#!/usr/bin/env bash")?;
        writeln!(out, "# {}", manifest.name)?;
        writeln!(out, "# Generated by nomad-init. Safe to run more than once.")?;
        writeln!(out, "set -euo pipefail")?;
        writeln!(out)?;

        if self.verbose {
            if self.color {
                writeln!(out, "{COLORS}")?;
            }
            writeln!(out, "STEP=0")?;
            writeln!(out, "STEP_DESC=''")?;
            let fail = self.marker("RED", "FAIL", "${STEP}:${STEP_DESC}");
            writeln!(out, "trap '{fail} >&2' ERR")?;
            writeln!(out)?;
        }

        for (i, step) in manifest.steps.iter().enumerate() {
            let index = i + 1;
            let desc = escape_double_quoted(step.description());
            let payload = format!("{index}:{desc}");

            writeln!(out, "# [{index}/{total}] {}", step.description())?;
            if self.verbose {
                writeln!(out, "STEP={index}; STEP_DESC=\"{desc}\"")?;
            }

            let body = step.to_bash().join("\n");
            match step.check_command() {
                Some(check) => {
                    writeln!(out, "if {check}; then")?;
                    if self.verbose {
                        writeln!(out, "{}", self.marker("YELLOW", "SKIP", &payload))?;
                    } else {
                        writeln!(out, ":")?;
                    }
                    writeln!(out, "else")?;
                    if self.verbose {
                        writeln!(out, "{}", self.marker("CYAN", "START", &payload))?;
                    }
                    writeln!(out, "{body}")?;
                    if self.verbose {
                        writeln!(out, "{}", self.marker("GREEN", "DONE", &payload))?;
                    }
                    writeln!(out, "fi")?;
                }
                None => {
                    if self.verbose {
                        writeln!(out, "{}", self.marker("CYAN", "START", &payload))?;
                    }
                    writeln!(out, "{body}")?;
                    if self.verbose {
                        writeln!(out, "{}", self.marker("GREEN", "DONE", &payload))?;
                    }
                }
            }
            writeln!(out)?;
        }

        if self.verbose {
            writeln!(out, "{}", self.marker("GREEN", "COMPLETE", &total.to_string()))?;
        }

        Ok(out)
    }
}
