//! Host capability
//!
//! Every side effect of provisioning goes through [`Host`]: filesystem
//! writes, downloads, interface lookup and external commands. The real
//! machine is [`SystemHost`]; tests substitute [`MemoryHost`].

mod memory;
mod system;

pub use memory::MemoryHost;
pub use system::SystemHost;

use std::path::Path;

use crate::error::HostError;

/// Captured result of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`-1` if the process was killed by a signal)
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Kind, permission bits and ownership of an existing path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMeta {
    pub is_dir: bool,
    /// Permission bits, e.g. `0o700`
    pub mode: u32,
    /// `user:group`
    pub owner: String,
}

impl PathMeta {
    /// Whether the path has `mode` and, when given, `owner`. An owner
    /// without a group only compares the user.
    pub fn matches(&self, mode: u32, owner: Option<&str>) -> bool {
        self.mode == mode
            && owner.is_none_or(|want| {
                if want.contains(':') {
                    self.owner == want
                } else {
                    self.owner.split(':').next() == Some(want)
                }
            })
    }
}

/// Operations the provisioner may perform on the target machine
pub trait Host {
    /// Whether the current process has root privileges
    fn is_root(&self) -> Result<bool, HostError>;

    /// Whether an executable is available in `PATH`
    fn has_tool(&self, name: &str) -> bool;

    fn exists(&self, path: &Path) -> bool;

    /// Mode and owner of a path, `None` if it does not exist
    fn metadata(&self, path: &Path) -> Result<Option<PathMeta>, HostError>;

    /// Read a file, `None` if it does not exist
    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, HostError>;

    /// Replace a file atomically and set its mode. Parent directories are created.
    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<(), HostError>;

    /// Create a directory (and parents) and set its mode
    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), HostError>;

    /// Remove a file or directory tree. Returns `false` if nothing was there.
    fn remove(&self, path: &Path) -> Result<bool, HostError>;

    /// Download a URL into memory
    fn download(&self, url: &str) -> Result<Vec<u8>, HostError>;

    /// IPv4 addresses bound to an interface, in CIDR notation as reported
    /// by the OS. Empty if the interface does not exist.
    fn ipv4_addresses(&self, interface: &str) -> Result<Vec<String>, HostError>;

    /// Run an external command to completion
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, HostError>;
}

/// Render a command line for logs and error messages
pub(crate) fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
