//! File management steps

use std::path::Path;

use super::{CloudInitFile, CloudInitFragment, Step, octal, run_checked, stat_check};
use crate::error::StepError;
use crate::fetch::sha256_hex;
use crate::host::Host;

/// Write a file with specified content
#[derive(Debug, Clone)]
pub struct WriteFile {
    /// File path
    pub path: String,
    /// File content
    pub content: String,
    /// File mode
    pub mode: u32,
    /// File owner (e.g., "nomad:nomad")
    pub owner: Option<String>,
    /// Description
    description: String,
}

impl WriteFile {
    /// Create a new file write step
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Write {path}");
        Self {
            path,
            content: content.into(),
            mode: 0o644,
            owner: None,
            description,
        }
    }

    /// Set file mode
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Set file owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// SHA256 of the content (hex-encoded)
    pub fn content_hash(&self) -> String {
        sha256_hex(self.content.as_bytes())
    }

    /// Heredoc delimiter that does not appear in the content
    pub(crate) fn heredoc_delimiter(content: &str) -> &'static str {
        ["NOMAD_EOF", "__NOMAD_FILE_END__", "__FILE_CONTENT_END_MARKER__"]
            .into_iter()
            .find(|d| !content.contains(d))
            .unwrap_or("__FILE_CONTENT_END_MARKER__")
    }

    fn owned_by_root(&self) -> bool {
        self.owner.as_deref().is_none_or(|o| o.starts_with("root"))
    }
}

impl Step for WriteFile {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_cloud_init(&self) -> CloudInitFragment {
        // write_files runs before runcmd creates users, so files owned by
        // the service user are written from runcmd instead
        if !self.owned_by_root() {
            return CloudInitFragment {
                runcmd: self.to_bash(),
                ..Default::default()
            };
        }
        CloudInitFragment {
            write_files: vec![CloudInitFile {
                path: self.path.clone(),
                content: self.content.clone(),
                permissions: Some(octal(self.mode)),
                owner: self.owner.clone(),
            }],
            ..Default::default()
        }
    }

    fn to_bash(&self) -> Vec<String> {
        let mut cmds = vec![format!("mkdir -p \"$(dirname '{}')\"", self.path)];

        // Heredocs always end with a newline
        let body = self.content.strip_suffix('\n').unwrap_or(&self.content);
        let expected_hash = sha256_hex(format!("{body}\n").as_bytes());
        let delimiter = Self::heredoc_delimiter(&self.content);

        cmds.push(format!(
            r#"CURRENT=$(sha256sum '{path}' 2>/dev/null | cut -d' ' -f1 || echo 'none')
if [ "$CURRENT" != "{expected_hash}" ]; then
cat > '{path}' << '{delimiter}'
{body}
{delimiter}
fi"#,
            path = self.path,
        ));

        cmds.push(format!("chmod {} '{}'", octal(self.mode), self.path));

        if let Some(owner) = &self.owner {
            cmds.push(format!("chown {} '{}'", owner, self.path));
        }

        cmds
    }

    fn check_command(&self) -> Option<String> {
        Some(format!(
            "[ -f '{path}' ] && [ \"$(sha256sum '{path}' | cut -d' ' -f1)\" = \"{hash}\" ] && {stat}",
            path = self.path,
            hash = self.content_hash(),
            stat = stat_check(&self.path, self.mode, self.owner.as_deref())
        ))
    }

    fn is_satisfied(&self, host: &dyn Host) -> Result<bool, StepError> {
        let path = Path::new(&self.path);
        let Some(meta) = host.metadata(path)? else {
            return Ok(false);
        };
        if meta.is_dir || !meta.matches(self.mode, self.owner.as_deref()) {
            return Ok(false);
        }
        let current = host.read_file(path)?;
        Ok(current.is_some_and(|bytes| sha256_hex(&bytes) == self.content_hash()))
    }

    fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        host.write_file(Path::new(&self.path), self.content.as_bytes(), self.mode)?;
        if let Some(owner) = &self.owner {
            run_checked(host, "chown", &[owner.as_str(), self.path.as_str()])?;
        }
        Ok(())
    }
}
