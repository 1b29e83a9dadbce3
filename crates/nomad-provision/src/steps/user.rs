//! Service account steps

use std::path::Path;

use tracing::warn;

use super::{CloudInitFragment, Step, WriteFile, run_checked};
use crate::error::StepError;
use crate::host::Host;

const SUDOERS_DIR: &str = "/etc/sudoers.d";

fn sudoers_path(user: &str) -> String {
    format!("{SUDOERS_DIR}/{user}")
}

fn user_exists(host: &dyn Host, name: &str) -> Result<bool, StepError> {
    Ok(host.run("id", &[name])?.success())
}

/// Ensure a system user exists
#[derive(Debug, Clone)]
pub struct EnsureUser {
    /// Username
    pub name: String,
    /// Home directory (not created)
    pub home: String,
    /// Login shell
    pub shell: String,
    /// Sudoers rule (e.g., "ALL=(ALL) NOPASSWD:ALL")
    pub sudo: Option<String>,
    /// Description
    description: String,
}

impl EnsureUser {
    /// Create a new system user step
    pub fn new(name: impl Into<String>, home: impl Into<String>) -> Self {
        let name = name.into();
        let description = format!("Ensure user {name} exists");
        Self {
            name,
            home: home.into(),
            shell: "/bin/false".into(),
            sudo: None,
            description,
        }
    }

    /// Set the login shell
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set sudo privileges
    pub fn with_sudo(mut self, sudo: impl Into<String>) -> Self {
        self.sudo = Some(sudo.into());
        self
    }

    fn sudoers_file(&self) -> Option<WriteFile> {
        self.sudo.as_ref().map(|rule| {
            WriteFile::new(sudoers_path(&self.name), format!("{} {rule}\n", self.name))
                .with_mode(0o440)
        })
    }

    fn useradd_args(&self) -> Vec<&str> {
        vec![
            "--system",
            "--user-group",
            "--no-create-home",
            "--home-dir",
            self.home.as_str(),
            "--shell",
            self.shell.as_str(),
            self.name.as_str(),
        ]
    }
}

impl Step for EnsureUser {
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
        let mut cmds = vec![format!(
            "id {} >/dev/null 2>&1 || useradd {}",
            self.name,
            self.useradd_args().join(" ")
        )];

        if let Some(sudo) = &self.sudo {
            cmds.push(format!(
                "echo '{} {}' > {path} && chmod 440 {path}",
                self.name,
                sudo,
                path = sudoers_path(&self.name)
            ));
        }

        cmds
    }

    fn check_command(&self) -> Option<String> {
        let mut check = format!("id {} >/dev/null 2>&1", self.name);
        if self.sudo.is_some() {
            check.push_str(&format!(" && [ -f {} ]", sudoers_path(&self.name)));
        }
        Some(check)
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        if !user_exists(host, &self.name)? {
            return Ok(false);
        }
        match self.sudoers_file() {
            Some(file) => file.is_satisfied(host),
            None => Ok(true),
        }
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        if !user_exists(host, &self.name)? {
            run_checked(host, "useradd", &self.useradd_args())?;
        }
        if let Some(file) = self.sudoers_file() {
            warn!(user = %self.name, "granting passwordless sudo");
            file.execute(host)?;
        }
        Ok(())
    }
}

/// Remove a system user and any sudoers entry it was given
#[derive(Debug, Clone)]
pub struct RemoveUser {
    /// Username
    pub name: String,
    /// Description
    description: String,
}

impl RemoveUser {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let description = format!("Remove user {name}");
        Self { name, description }
    }
}

impl Step for RemoveUser {
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
        vec![
            format!(
                "! id {name} >/dev/null 2>&1 || userdel {name}",
                name = self.name
            ),
            format!("rm -f {}", sudoers_path(&self.name)),
        ]
    }

    fn check_command(&self) -> Option<String> {
        Some(format!(
            "! id {} >/dev/null 2>&1 && [ ! -e {} ]",
            self.name,
            sudoers_path(&self.name)
        ))
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        Ok(!user_exists(host, &self.name)? && !host.exists(Path::new(&sudoers_path(&self.name))))
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        if user_exists(host, &self.name)? {
            run_checked(host, "userdel", &[self.name.as_str()])?;
        }
        host.remove(Path::new(&sudoers_path(&self.name)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::steps::StepResult;

    #[test]
    fn test_ensure_user_without_sudo() {
        let host = MemoryHost::new();
        let step = EnsureUser::new("nomad", "/opt/nomad");

        assert_eq!(step.execute(&host).unwrap(), StepResult::Applied);
        assert!(host.has_user("nomad"));
        assert!(!host.exists(Path::new("/etc/sudoers.d/nomad")));
        assert_eq!(step.execute(&host).unwrap(), StepResult::AlreadySatisfied);
    }

    #[test]
    fn test_ensure_user_with_sudo() {
        let host = MemoryHost::new();
        let step = EnsureUser::new("nomad", "/opt/nomad").with_sudo("ALL=(ALL) NOPASSWD:ALL");

        assert_eq!(step.execute(&host).unwrap(), StepResult::Applied);
        assert_eq!(
            host.file_string("/etc/sudoers.d/nomad").as_deref(),
            Some("nomad ALL=(ALL) NOPASSWD:ALL\n")
        );
        assert_eq!(host.mode("/etc/sudoers.d/nomad"), Some(0o440));
    }

    #[test]
    fn test_ensure_user_bash() {
        let step = EnsureUser::new("nomad", "/opt/nomad");
        let bash = step.to_bash();

        assert_eq!(bash.len(), 1);
        assert!(bash[0].contains("id nomad >/dev/null 2>&1 || useradd --system"));
        assert!(bash[0].contains("--home-dir /opt/nomad --shell /bin/false nomad"));
        assert!(!bash[0].contains("sudoers"));
    }

    #[test]
    fn test_remove_user() {
        let host = MemoryHost::new();
        let step = RemoveUser::new("nomad");
        assert_eq!(step.execute(&host).unwrap(), StepResult::AlreadySatisfied);

        EnsureUser::new("nomad", "/opt/nomad")
            .with_sudo("ALL=(ALL) NOPASSWD:ALL")
            .execute(&host)
            .unwrap();
        assert_eq!(step.execute(&host).unwrap(), StepResult::Applied);
        assert!(!host.has_user("nomad"));
        assert!(!host.exists(Path::new("/etc/sudoers.d/nomad")));
    }
}
