//! In-memory host for tests and dry runs
//!
//! Models just enough of a Linux machine for the provisioning steps: a flat
//! file table, system users, interface addresses, canned downloads and a
//! small `systemctl` state machine. Every command is recorded.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::{CommandOutput, Host, PathMeta, command_line};
use crate::error::HostError;

#[derive(Debug, Clone)]
struct Entry {
    contents: Option<Vec<u8>>,
    mode: u32,
    owner: String,
}

#[derive(Debug, Default)]
struct State {
    root: bool,
    tools: BTreeSet<String>,
    entries: BTreeMap<PathBuf, Entry>,
    remote: HashMap<String, Vec<u8>>,
    downloads: Vec<String>,
    interfaces: BTreeMap<String, Vec<String>>,
    users: BTreeSet<String>,
    enabled: BTreeSet<String>,
    active: BTreeSet<String>,
    canned: HashMap<String, CommandOutput>,
    rejected: BTreeSet<String>,
    commands: Vec<String>,
}

/// A fake machine held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: RefCell<State>,
}

impl MemoryHost {
    /// A pristine host: running as root, with the usual system tools
    pub fn new() -> Self {
        let host = Self::default();
        {
            let mut state = host.state.borrow_mut();
            state.root = true;
            for tool in ["systemctl", "useradd", "userdel", "id", "chown", "ip"] {
                state.tools.insert(tool.to_string());
            }
        }
        host
    }

    /// Drop root privileges
    pub fn without_root(self) -> Self {
        self.state.borrow_mut().root = false;
        self
    }

    /// Remove a tool from `PATH`
    pub fn without_tool(self, name: &str) -> Self {
        self.state.borrow_mut().tools.remove(name);
        self
    }

    /// Bind addresses (CIDR notation) to an interface
    pub fn with_interface(
        self,
        name: impl Into<String>,
        addrs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.state
            .borrow_mut()
            .interfaces
            .insert(name.into(), addrs.into_iter().map(Into::into).collect());
        self
    }

    /// Serve `body` for downloads of `url`
    pub fn with_remote(self, url: impl Into<String>, body: Vec<u8>) -> Self {
        self.state.borrow_mut().remote.insert(url.into(), body);
        self
    }

    /// Answer an exact command line with a canned output
    pub fn with_output(self, command: impl Into<String>, output: CommandOutput) -> Self {
        self.state.borrow_mut().canned.insert(command.into(), output);
        self
    }

    /// Make an exact command line exit with status 1
    pub fn reject(self, command: impl Into<String>) -> Self {
        self.state.borrow_mut().rejected.insert(command.into());
        self
    }

    /// Contents of a file, if present
    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .entries
            .get(path.as_ref())
            .and_then(|e| e.contents.clone())
    }

    /// Contents of a file as UTF-8
    pub fn file_string(&self, path: impl AsRef<Path>) -> Option<String> {
        self.file(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        self.state
            .borrow()
            .entries
            .get(path.as_ref())
            .is_some_and(|e| e.contents.is_none())
    }

    /// Mode of a file or directory
    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.state.borrow().entries.get(path.as_ref()).map(|e| e.mode)
    }

    /// Owner of a file or directory (`root:root` unless changed)
    pub fn owner(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state
            .borrow()
            .entries
            .get(path.as_ref())
            .map(|e| e.owner.clone())
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.state.borrow().users.contains(name)
    }

    pub fn is_enabled(&self, unit: &str) -> bool {
        self.state.borrow().enabled.contains(unit)
    }

    pub fn is_active(&self, unit: &str) -> bool {
        self.state.borrow().active.contains(unit)
    }

    /// URLs downloaded so far, in order
    pub fn downloads(&self) -> Vec<String> {
        self.state.borrow().downloads.clone()
    }

    /// Command lines run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    fn unit_loaded(state: &State, unit: &str) -> bool {
        let file_name = if unit.ends_with(".service") {
            unit.to_string()
        } else {
            format!("{unit}.service")
        };
        state
            .entries
            .keys()
            .any(|p| p.file_name().is_some_and(|n| n == file_name.as_str()))
    }

    fn systemctl(state: &mut State, args: &[&str]) -> CommandOutput {
        match args {
            ["daemon-reload"] => CommandOutput::ok(""),
            ["is-active", unit] => {
                if state.active.contains(*unit) {
                    CommandOutput::ok("active\n")
                } else {
                    CommandOutput {
                        code: 3,
                        stdout: "inactive\n".into(),
                        stderr: String::new(),
                    }
                }
            }
            ["is-enabled", unit] => {
                if state.enabled.contains(*unit) {
                    CommandOutput::ok("enabled\n")
                } else {
                    CommandOutput {
                        code: 1,
                        stdout: "disabled\n".into(),
                        stderr: String::new(),
                    }
                }
            }
            [verb @ ("enable" | "start"), unit] => {
                if !Self::unit_loaded(state, unit) {
                    return CommandOutput::failed(5, format!("Unit {unit}.service not found."));
                }
                if *verb == "enable" {
                    state.enabled.insert((*unit).to_string());
                } else {
                    state.active.insert((*unit).to_string());
                }
                CommandOutput::ok("")
            }
            ["disable", unit] => {
                state.enabled.remove(*unit);
                CommandOutput::ok("")
            }
            ["stop", unit] => {
                state.active.remove(*unit);
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(1, "unsupported systemctl invocation"),
        }
    }

    fn dispatch(state: &mut State, program: &str, args: &[&str]) -> CommandOutput {
        match (program, args) {
            ("systemctl", _) => Self::systemctl(state, args),
            ("id", ["-u"]) => CommandOutput::ok(if state.root { "0\n" } else { "1000\n" }),
            ("id", [user]) => {
                if state.users.contains(*user) {
                    CommandOutput::ok(format!("uid=999({user})\n"))
                } else {
                    CommandOutput::failed(1, format!("id: '{user}': no such user"))
                }
            }
            ("useradd", [.., user]) => {
                if state.users.insert((*user).to_string()) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(9, format!("useradd: user '{user}' already exists"))
                }
            }
            ("userdel", [.., user]) => {
                if state.users.remove(*user) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(6, format!("userdel: user '{user}' does not exist"))
                }
            }
            ("chown", [owner, path]) => match state.entries.get_mut(Path::new(path)) {
                Some(entry) => {
                    entry.owner = (*owner).to_string();
                    CommandOutput::ok("")
                }
                None => CommandOutput::failed(1, format!("chown: cannot access '{path}'")),
            },
            _ if state.entries.contains_key(Path::new(program)) => CommandOutput::ok(""),
            _ => CommandOutput::failed(127, format!("{program}: command not found")),
        }
    }
}

impl Host for MemoryHost {
    fn is_root(&self) -> Result<bool, HostError> {
        Ok(self.state.borrow().root)
    }

    fn has_tool(&self, name: &str) -> bool {
        self.state.borrow().tools.contains(name)
    }

    fn exists(&self, path: &Path) -> bool {
        self.state.borrow().entries.contains_key(path)
    }

    fn metadata(&self, path: &Path) -> Result<Option<PathMeta>, HostError> {
        Ok(self.state.borrow().entries.get(path).map(|e| PathMeta {
            is_dir: e.contents.is_none(),
            mode: e.mode,
            owner: e.owner.clone(),
        }))
    }

    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, HostError> {
        Ok(self.file(path))
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        let owner = state
            .entries
            .get(path)
            .map_or_else(|| "root:root".to_string(), |e| e.owner.clone());
        state.entries.insert(
            path.to_path_buf(),
            Entry {
                contents: Some(contents.to_vec()),
                mode,
                owner,
            },
        );
        Ok(())
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        let entry = state
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| Entry {
                contents: None,
                mode,
                owner: "root:root".into(),
            });
        entry.mode = mode;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<bool, HostError> {
        let mut state = self.state.borrow_mut();
        let before = state.entries.len();
        state.entries.retain(|p, _| !p.starts_with(path));
        Ok(state.entries.len() != before)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, HostError> {
        let mut state = self.state.borrow_mut();
        state.downloads.push(url.to_string());
        state
            .remote
            .get(url)
            .cloned()
            .ok_or_else(|| HostError::Download {
                url: url.to_string(),
                reason: "HTTP 404".into(),
            })
    }

    fn ipv4_addresses(&self, interface: &str) -> Result<Vec<String>, HostError> {
        Ok(self
            .state
            .borrow()
            .interfaces
            .get(interface)
            .cloned()
            .unwrap_or_default())
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, HostError> {
        let line = command_line(program, args);
        let mut state = self.state.borrow_mut();
        state.commands.push(line.clone());

        if state.rejected.contains(&line) {
            return Ok(CommandOutput::failed(1, format!("{program}: rejected")));
        }
        if let Some(output) = state.canned.get(&line) {
            return Ok(output.clone());
        }
        Ok(Self::dispatch(&mut state, program, args))
    }
}
