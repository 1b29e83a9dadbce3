//! The real machine

use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use super::{CommandOutput, Host, PathMeta, command_line};
use crate::error::HostError;

static INET_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\binet\s+(\d{1,3}(?:\.\d{1,3}){3}(?:/\d{1,2})?)").unwrap());

/// Download timeout for a single artifact
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Host implementation backed by the local filesystem, `ureq` and
/// `std::process::Command`
#[derive(Debug, Clone, Default)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> HostError + '_ {
    move |source| HostError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parse `ip -o -4 addr show` output into CIDR addresses
pub(crate) fn parse_ip_addr_output(output: &str) -> Vec<String> {
    INET_ADDR
        .captures_iter(output)
        .map(|caps| caps[1].to_string())
        .collect()
}

impl Host for SystemHost {
    fn is_root(&self) -> Result<bool, HostError> {
        let output = self.run("id", &["-u"])?;
        Ok(output.success() && output.stdout.trim() == "0")
    }

    fn has_tool(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn metadata(&self, path: &Path) -> Result<Option<PathMeta>, HostError> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path)(e)),
        };

        // Owner names, as the shell checks see them
        let arg = path.to_string_lossy();
        let output = self.run("stat", &["-c", "%U:%G", &arg])?;
        if !output.success() {
            return Err(io_error(path)(std::io::Error::other(output.stderr)));
        }

        Ok(Some(PathMeta {
            is_dir: meta.is_dir(),
            mode: meta.permissions().mode() & 0o7777,
            owner: output.stdout.trim().to_string(),
        }))
    }

    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, HostError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path)(e)),
        }
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<(), HostError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("/"));
        fs::create_dir_all(parent).map_err(io_error(parent))?;

        // Stage next to the target so the final rename stays on one filesystem
        let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(io_error(parent))?;
        staged.write_all(contents).map_err(io_error(staged.path()))?;
        fs::set_permissions(staged.path(), fs::Permissions::from_mode(mode))
            .map_err(io_error(path))?;
        staged
            .persist(path)
            .map_err(|e| io_error(path)(e.error))?;

        debug!(path = %path.display(), mode = %format!("{mode:04o}"), "wrote file");
        Ok(())
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), HostError> {
        fs::create_dir_all(path).map_err(io_error(path))?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_error(path))
    }

    fn remove(&self, path: &Path) -> Result<bool, HostError> {
        let Ok(meta) = fs::symlink_metadata(path) else {
            return Ok(false);
        };
        if meta.is_dir() {
            fs::remove_dir_all(path).map_err(io_error(path))?;
        } else {
            fs::remove_file(path).map_err(io_error(path))?;
        }
        debug!(path = %path.display(), "removed");
        Ok(true)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, HostError> {
        debug!(url, "downloading");
        let response = match ureq::get(url).timeout(DOWNLOAD_TIMEOUT).call() {
            Ok(r) => r,
            Err(ureq::Error::Status(code, _)) => {
                return Err(HostError::Download {
                    url: url.to_string(),
                    reason: format!("HTTP {code}"),
                });
            }
            Err(e) => {
                return Err(HostError::Download {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| HostError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(body)
    }

    fn ipv4_addresses(&self, interface: &str) -> Result<Vec<String>, HostError> {
        let output = self.run("ip", &["-o", "-4", "addr", "show", "dev", interface])?;
        if !output.success() {
            // `ip` exits non-zero when the device does not exist
            return Ok(vec![]);
        }
        Ok(parse_ip_addr_output(&output.stdout))
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, HostError> {
        debug!(command = %command_line(program, args), "running");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| HostError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
