//! Release artifact steps

use std::path::Path;

use tracing::debug;

use super::{CloudInitFragment, Step, octal};
use crate::error::{HostError, StepError};
use crate::fetch::{ArtifactFetcher, BINARY_MODE, host_arch, resolve_url};
use crate::host::Host;

/// Version reported by `<binary> version`, e.g. "Nomad v1.10.0" -> "1.10.0"
pub(crate) fn parse_version_output(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .next()?
        .split_whitespace()
        .filter_map(|word| word.strip_prefix('v'))
        .find(|v| v.starts_with(|c: char| c.is_ascii_digit()))
}

/// File inside a bundle directory holding the installed version
pub const BUNDLE_STAMP: &str = ".version";

/// Install a single binary from a zip release archive
#[derive(Debug, Clone)]
pub struct InstallBinary {
    /// Destination path; its file name is the archive entry to extract
    pub dest: String,
    pub version: String,
    /// Download URL with `{version}` and `{arch}` placeholders
    pub url_template: String,
    pub arch: String,
    /// Reinstall even if the requested version is present
    pub replace: bool,
    description: String,
}

impl InstallBinary {
    pub fn new(
        dest: impl Into<String>,
        version: impl Into<String>,
        url_template: impl Into<String>,
    ) -> Self {
        let dest = dest.into();
        let version = version.into();
        let description = format!("Install {dest} v{version}");
        Self {
            dest,
            version,
            url_template: url_template.into(),
            arch: host_arch().into(),
            replace: false,
            description,
        }
    }

    /// Set the architecture substituted into the URL
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Reinstall even if the requested version is present
    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    fn entry(&self) -> &str {
        self.dest.rsplit('/').next().unwrap_or(&self.dest)
    }

    /// Version of the binary currently installed at `dest`, if any
    pub fn installed_version(&self, host: &dyn Host) -> Result<Option<String>, StepError> {
        if !host.exists(Path::new(&self.dest)) {
            return Ok(None);
        }
        // An unrunnable file is not the binary we want
        let output = match host.run(&self.dest, &["version"]) {
            Ok(output) => output,
            Err(HostError::Spawn { source, .. }) => {
                debug!(path = %self.dest, error = %source, "installed binary does not run");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_version_output(&output.stdout).map(String::from))
    }
}

impl Step for InstallBinary {
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
        let url = resolve_url(&self.url_template, &self.version, &self.arch);
        vec![
            "TMP=$(mktemp -d)".into(),
            format!("curl -fsSL '{url}' -o \"$TMP/release.zip\""),
            format!("unzip -o -q -j \"$TMP/release.zip\" '*{}' -d \"$TMP\"", self.entry()),
            format!(
                "install -m {} \"$TMP/{}\" '{}'",
                octal(BINARY_MODE),
                self.entry(),
                self.dest
            ),
            "rm -rf \"$TMP\"".into(),
        ]
    }

    fn check_command(&self) -> Option<String> {
        if self.replace {
            return None;
        }
        Some(format!(
            "[ -x '{dest}' ] && '{dest}' version 2>/dev/null | head -n1 | grep -qwF 'v{version}'",
            dest = self.dest,
            version = self.version
        ))
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        if self.replace {
            return Ok(false);
        }
        let installed = self.installed_version(host)?;
        debug!(path = %self.dest, installed = ?installed, wanted = %self.version, "checked installed binary");
        Ok(installed.as_deref() == Some(self.version.as_str()))
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        ArtifactFetcher::new(host)
            .with_arch(&self.arch)
            .fetch(&self.version, &self.url_template, Path::new(&self.dest))?;
        Ok(())
    }
}

/// Install every file of a `.tar.gz` bundle into a directory.
///
/// A stamp file in the directory records the installed version.
#[derive(Debug, Clone)]
pub struct InstallBundle {
    pub dir: String,
    pub version: String,
    /// Download URL with `{version}` and `{arch}` placeholders
    pub url_template: String,
    pub arch: String,
    description: String,
}

impl InstallBundle {
    pub fn new(
        dir: impl Into<String>,
        version: impl Into<String>,
        url_template: impl Into<String>,
    ) -> Self {
        let dir = dir.into();
        let version = version.into();
        let description = format!("Install bundle v{version} into {dir}");
        Self {
            dir,
            version,
            url_template: url_template.into(),
            arch: host_arch().into(),
            description,
        }
    }

    /// Set the architecture substituted into the URL
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Path of the version stamp
    pub fn stamp_path(&self) -> String {
        format!("{}/{BUNDLE_STAMP}", self.dir.trim_end_matches('/'))
    }
}

impl Step for InstallBundle {
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
        let url = resolve_url(&self.url_template, &self.version, &self.arch);
        vec![
            format!("mkdir -p '{}'", self.dir),
            "TMP=$(mktemp -d)".into(),
            format!("curl -fsSL '{url}' -o \"$TMP/bundle.tgz\""),
            format!("tar -xzf \"$TMP/bundle.tgz\" -C '{}'", self.dir),
            format!("echo '{}' > '{}'", self.version, self.stamp_path()),
            "rm -rf \"$TMP\"".into(),
        ]
    }

    fn check_command(&self) -> Option<String> {
        Some(format!(
            "[ \"$(cat '{}' 2>/dev/null)\" = '{}' ]",
            self.stamp_path(),
            self.version
        ))
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        let stamp = host.read_file(Path::new(&self.stamp_path()))?;
        Ok(stamp.is_some_and(|bytes| String::from_utf8_lossy(&bytes).trim() == self.version))
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        ArtifactFetcher::new(host).with_arch(&self.arch).fetch_tree(
            &self.version,
            &self.url_template,
            Path::new(&self.dir),
        )?;
        host.write_file(
            Path::new(&self.stamp_path()),
            format!("{}\n", self.version).as_bytes(),
            0o644,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::tests::{tar_gz_archive, zip_archive};
    use crate::host::{CommandOutput, MemoryHost};
    use crate::steps::StepResult;

    const URL: &str = "https://example.test/nomad/{version}/nomad_{arch}.zip";

    #[test]
    fn test_parse_version_output() {
        assert_eq!(
            parse_version_output("Nomad v1.10.0\nBuildDate 2025-04-09T16:40:54Z\n"),
            Some("1.10.0")
        );
        assert_eq!(parse_version_output("Nomad v1.9.7-ent (abc)\n"), Some("1.9.7-ent"));
        assert_eq!(parse_version_output("garbage"), None);
        assert_eq!(parse_version_output(""), None);
    }

    #[test]
    fn test_install_binary_skips_matching_version() {
        let host = MemoryHost::new()
            .with_remote(
                "https://example.test/nomad/1.10.0/nomad_amd64.zip",
                zip_archive(&[("nomad", b"bin")]),
            )
            .with_output(
                "/usr/local/bin/nomad version",
                CommandOutput::ok("Nomad v1.10.0\n"),
            );
        let step = InstallBinary::new("/usr/local/bin/nomad", "1.10.0", URL).with_arch("amd64");

        assert_eq!(step.execute(&host).unwrap(), StepResult::Applied);
        assert_eq!(host.mode("/usr/local/bin/nomad"), Some(0o755));
        assert_eq!(step.execute(&host).unwrap(), StepResult::AlreadySatisfied);
        assert_eq!(host.downloads().len(), 1);
    }

    #[test]
    fn test_install_binary_upgrades_other_version() {
        let host = MemoryHost::new()
            .with_remote(
                "https://example.test/nomad/1.10.0/nomad_amd64.zip",
                zip_archive(&[("nomad", b"new")]),
            )
            .with_output(
                "/usr/local/bin/nomad version",
                CommandOutput::ok("Nomad v1.9.0\n"),
            );
        host.write_file(Path::new("/usr/local/bin/nomad"), b"old", 0o755)
            .unwrap();
        let step = InstallBinary::new("/usr/local/bin/nomad", "1.10.0", URL).with_arch("amd64");

        assert!(!step.is_satisfied(&host).unwrap());
        step.apply(&host).unwrap();
        assert_eq!(host.file("/usr/local/bin/nomad").unwrap(), b"new");
    }

    #[test]
    fn test_unrunnable_binary_is_not_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nomad");
        std::fs::write(&dest, b"not an executable").unwrap();
        let step = InstallBinary::new(dest.to_string_lossy(), "1.10.0", URL);

        let host = crate::host::SystemHost::new();
        assert_eq!(step.installed_version(&host).unwrap(), None);
        assert!(!step.is_satisfied(&host).unwrap());
    }

    #[test]
    fn test_install_binary_replace_always_runs() {
        let host = MemoryHost::new().with_output(
            "/usr/local/bin/nomad version",
            CommandOutput::ok("Nomad v1.10.0\n"),
        );
        host.write_file(Path::new("/usr/local/bin/nomad"), b"bin", 0o755)
            .unwrap();
        let step = InstallBinary::new("/usr/local/bin/nomad", "1.10.0", URL).replace_existing(true);

        assert!(!step.is_satisfied(&host).unwrap());
        assert!(step.check_command().is_none());
    }

    #[test]
    fn test_install_binary_network_failure() {
        let host = MemoryHost::new();
        let step = InstallBinary::new("/usr/local/bin/nomad", "1.10.0", URL);

        let err = step.execute(&host).unwrap_err();
        assert!(matches!(err, StepError::Fetch(FetchError::NetworkError { .. })));
        assert!(!host.exists(Path::new("/usr/local/bin/nomad")));
    }

    #[test]
    fn test_install_binary_bash() {
        let step = InstallBinary::new("/usr/local/bin/nomad", "1.10.0", URL).with_arch("arm64");
        let bash = step.to_bash().join("\n");

        assert!(bash.contains("curl -fsSL 'https://example.test/nomad/1.10.0/nomad_arm64.zip'"));
        assert!(bash.contains("install -m 0755 \"$TMP/nomad\" '/usr/local/bin/nomad'"));
        assert!(step.check_command().unwrap().contains("grep -qwF 'v1.10.0'"));
    }

    #[test]
    fn test_install_bundle_stamps_version() {
        let host = MemoryHost::new().with_remote(
            "https://example.test/cni-1.5.1-amd64.tgz",
            tar_gz_archive(&[("./bridge", b"bridge"), ("./host-local", b"ipam")]),
        );
        let step = InstallBundle::new(
            "/opt/cni/bin",
            "1.5.1",
            "https://example.test/cni-{version}-{arch}.tgz",
        )
        .with_arch("amd64");

        assert_eq!(step.execute(&host).unwrap(), StepResult::Applied);
        assert_eq!(host.file("/opt/cni/bin/host-local").unwrap(), b"ipam");
        assert_eq!(host.file_string("/opt/cni/bin/.version").as_deref(), Some("1.5.1\n"));
        assert_eq!(step.execute(&host).unwrap(), StepResult::AlreadySatisfied);
        assert_eq!(host.downloads().len(), 1);
    }
}
