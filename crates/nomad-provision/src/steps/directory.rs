//! Directory management steps

use std::path::Path;

use super::{CloudInitFragment, Step, octal, run_checked, stat_check};
use crate::error::StepError;
use crate::host::Host;

/// Ensure a directory exists
#[derive(Debug, Clone)]
pub struct EnsureDirectory {
    /// Directory path
    pub path: String,
    /// Directory mode
    pub mode: u32,
    /// Directory owner (e.g., "nomad:nomad")
    pub owner: Option<String>,
    /// Description
    description: String,
}

impl EnsureDirectory {
    /// Create a new directory step
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Ensure directory {path}");
        Self {
            path,
            mode: 0o755,
            owner: None,
            description,
        }
    }

    /// Set directory mode
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Set directory owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

impl Step for EnsureDirectory {
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
        let mut cmds = vec![
            format!("mkdir -p '{}'", self.path),
            format!("chmod {} '{}'", octal(self.mode), self.path),
        ];

        if let Some(owner) = &self.owner {
            cmds.push(format!("chown {} '{}'", owner, self.path));
        }

        cmds
    }

    fn check_command(&self) -> Option<String> {
        Some(format!(
            "[ -d '{}' ] && {}",
            self.path,
            stat_check(&self.path, self.mode, self.owner.as_deref())
        ))
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        let meta = host.metadata(Path::new(&self.path))?;
        Ok(meta.is_some_and(|m| m.is_dir && m.matches(self.mode, self.owner.as_deref())))
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        host.create_dir_all(Path::new(&self.path), self.mode)?;
        if let Some(owner) = &self.owner {
            run_checked(host, "chown", &[owner.as_str(), self.path.as_str()])?;
        }
        Ok(())
    }
}
