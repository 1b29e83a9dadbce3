//! Removal steps

use std::path::Path;

use super::{CloudInitFragment, Step};
use crate::error::StepError;
use crate::host::Host;

/// Ensure a file or directory tree is gone
#[derive(Debug, Clone)]
pub struct RemovePath {
    pub path: String,
    /// Only remove a directory that contains this file
    pub marker: Option<String>,
    description: String,
}

impl RemovePath {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Remove {path}");
        Self {
            path,
            marker: None,
            description,
        }
    }

    /// Leave the directory alone unless `marker` exists inside it
    pub fn guarded_by(mut self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        self.description = format!("Remove {} if it contains {marker}", self.path);
        self.marker = Some(marker);
        self
    }

    /// Path whose absence means there is nothing to do
    fn target(&self) -> String {
        match &self.marker {
            Some(marker) => format!("{}/{marker}", self.path.trim_end_matches('/')),
            None => self.path.clone(),
        }
    }
}

impl Step for RemovePath {
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
        match &self.marker {
            Some(_) => vec![format!(
                "if [ -e '{}' ]; then rm -rf '{}'; fi",
                self.target(),
                self.path
            )],
            None => vec![format!("rm -rf '{}'", self.path)],
        }
    }

    fn check_command(&self) -> Option<String> {
        Some(format!("[ ! -e '{}' ]", self.target()))
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        Ok(!host.exists(Path::new(&self.target())))
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        host.remove(Path::new(&self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::steps::StepResult;

    #[test]
    fn test_remove_path() {
        let host = MemoryHost::new();
        let step = RemovePath::new("/usr/local/bin/nomad");
        assert_eq!(step.execute(&host).unwrap(), StepResult::AlreadySatisfied);

        host.write_file(Path::new("/usr/local/bin/nomad"), b"bin", 0o755)
            .unwrap();
        assert_eq!(step.execute(&host).unwrap(), StepResult::Applied);
        assert!(!host.exists(Path::new("/usr/local/bin/nomad")));
    }

    #[test]
    fn test_guarded_remove_needs_marker() {
        let host = MemoryHost::new();
        host.write_file(Path::new("/opt/cni/bin/bridge"), b"elf", 0o755)
            .unwrap();
        let step = RemovePath::new("/opt/cni/bin").guarded_by(".version");

        assert_eq!(step.execute(&host).unwrap(), StepResult::AlreadySatisfied);
        assert!(host.exists(Path::new("/opt/cni/bin/bridge")));

        host.write_file(Path::new("/opt/cni/bin/.version"), b"1.5.1\n", 0o644)
            .unwrap();
        assert_eq!(step.execute(&host).unwrap(), StepResult::Applied);
        assert!(!host.exists(Path::new("/opt/cni/bin")));
        assert!(!host.exists(Path::new("/opt/cni/bin/bridge")));
    }

    #[test]
    fn test_guarded_remove_bash() {
        let step = RemovePath::new("/opt/cni/bin/").guarded_by(".version");

        assert_eq!(
            step.check_command().as_deref(),
            Some("[ ! -e '/opt/cni/bin/.version' ]")
        );
        assert_eq!(
            step.to_bash(),
            vec!["if [ -e '/opt/cni/bin/.version' ]; then rm -rf '/opt/cni/bin/'; fi"]
        );
    }
}
