//! End-to-end runs against an in-memory host

use std::io::{Cursor, Write};
use std::path::Path;

use nomad_provision::{
    CommandOutput, ConfigError, Host, HostState, InstallSpec, MemoryHost, PreconditionError,
    ProvisionError, Provisioner, ServiceError, StepError, StepResult,
};

const RELEASE_URL: &str = "https://releases.example.test/nomad/1.10.0/nomad_amd64.zip";
const CONFIG: &str = "/etc/nomad.d/nomad.hcl";
const UNIT: &str = "/etc/systemd/system/nomad.service";
const BINARY: &str = "/usr/local/bin/nomad";

fn release_zip() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("nomad", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"\x7fELF nomad 1.10.0").unwrap();
    writer.finish().unwrap().into_inner()
}

fn spec() -> InstallSpec {
    InstallSpec::builder()
        .version("1.10.0")
        .url_template("https://releases.example.test/nomad/{version}/nomad_{arch}.zip")
        .arch("amd64")
        .interface("wt0")
        .server_address("10.0.0.1")
        .build()
}

/// A root host with `wt0` up and the release available
fn host() -> MemoryHost {
    MemoryHost::new()
        .with_interface("wt0", ["10.0.0.5/24"])
        .with_remote(RELEASE_URL, release_zip())
        .with_output(
            "/usr/local/bin/nomad version",
            CommandOutput::ok("Nomad v1.10.0\nBuildDate 2025-04-09T16:40:54Z\n"),
        )
}

#[test]
fn test_fresh_install_renders_config_and_starts_service() {
    let host = host();
    let provisioner = Provisioner::new(&host);

    let results = provisioner.run(&spec()).unwrap();

    assert!(results.iter().all(|r| *r == StepResult::Applied));
    let config = host.file_string(CONFIG).unwrap();
    assert!(config.contains("http = \"10.0.0.5:4646\""));
    assert!(config.contains("servers = [\"10.0.0.1\"]"));
    assert_eq!(host.mode(CONFIG), Some(0o600));
    assert_eq!(host.owner(CONFIG).as_deref(), Some("nomad:nomad"));
    assert_eq!(host.mode(BINARY), Some(0o755));
    assert!(host.has_user("nomad"));
    assert!(host.is_enabled("nomad"));
    assert!(host.is_active("nomad"));
    assert_eq!(provisioner.state(&spec()).unwrap(), HostState::Running);
}

#[test]
fn test_second_run_is_idempotent() {
    let host = host();
    let provisioner = Provisioner::new(&host);

    provisioner.run(&spec()).unwrap();
    let config = host.file(CONFIG).unwrap();
    let unit = host.file(UNIT).unwrap();

    let results = provisioner.run(&spec()).unwrap();

    assert!(results.iter().all(|r| *r == StepResult::AlreadySatisfied));
    assert_eq!(host.downloads(), vec![RELEASE_URL.to_string()]);
    assert_eq!(host.file(CONFIG).unwrap(), config);
    assert_eq!(host.file(UNIT).unwrap(), unit);
}

#[test]
fn test_missing_interface_aborts_before_registration() {
    let host = MemoryHost::new().with_remote(RELEASE_URL, release_zip());

    let err = Provisioner::new(&host).run(&spec()).unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Config(ConfigError::InterfaceNotFound(ref i)) if i == "wt0"
    ));
    assert!(err.step_error().is_none());
    assert!(host.downloads().is_empty());
    assert!(!host.has_user("nomad"));
    assert!(!host.exists(Path::new(BINARY)));
    assert!(!host.exists(Path::new(CONFIG)));
    assert!(!host.exists(Path::new(UNIT)));
}

#[test]
fn test_service_manager_rejection() {
    let host = host().reject("systemctl start nomad");

    let err = Provisioner::new(&host).run(&spec()).unwrap_err();

    match err {
        ProvisionError::Step {
            index,
            total,
            source: StepError::Service(ServiceError::ManagerRejected { command, .. }),
            ..
        } => {
            assert_eq!((index, total), (6, 6));
            assert_eq!(command, "systemctl start nomad");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(host.is_enabled("nomad"));
    assert!(!host.is_active("nomad"));
}

#[test]
fn test_config_drift_is_repaired() {
    let host = host();
    let provisioner = Provisioner::new(&host);
    provisioner.run(&spec()).unwrap();

    host.write_file(Path::new(CONFIG), b"datacenter = \"edited\"\n", 0o600)
        .unwrap();
    let results = provisioner.run(&spec()).unwrap();

    assert_eq!(
        results
            .iter()
            .filter(|r| **r == StepResult::Applied)
            .count(),
        1
    );
    assert!(host.file_string(CONFIG).unwrap().contains("datacenter = \"dc1\""));
    assert_eq!(host.downloads().len(), 1);
}

#[test]
fn test_replace_existing_refetches() {
    let host = host();
    let provisioner = Provisioner::new(&host);
    provisioner.run(&spec()).unwrap();

    let replace = InstallSpec {
        replace_existing: true,
        ..spec()
    };
    let results = provisioner.run(&replace).unwrap();

    assert_eq!(results.len(), 7);
    assert_eq!(host.downloads().len(), 2);
    assert!(host.commands().iter().any(|c| c == "systemctl stop nomad"));
    assert!(host.is_active("nomad"));
}

#[test]
fn test_sudo_requires_opt_in() {
    let host = host();
    Provisioner::new(&host).run(&spec()).unwrap();
    assert!(!host.exists(Path::new("/etc/sudoers.d/nomad")));

    let host = self::host();
    let granted = InstallSpec {
        grant_sudo: true,
        ..spec()
    };
    Provisioner::new(&host).run(&granted).unwrap();
    assert_eq!(host.mode("/etc/sudoers.d/nomad"), Some(0o440));
}

#[test]
fn test_not_root_touches_nothing() {
    let host = host().without_root();

    let err = Provisioner::new(&host).run(&spec()).unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Precondition(PreconditionError::NotRoot)
    ));
    assert!(host.downloads().is_empty());
    assert!(!host.exists(Path::new(BINARY)));
}

#[test]
fn test_uninstall_pristine_host_is_noop() {
    let host = MemoryHost::new();

    let results = Provisioner::new(&host).uninstall(&spec(), true).unwrap();

    assert!(results.iter().all(|r| *r == StepResult::AlreadySatisfied));
    assert!(
        !host
            .commands()
            .iter()
            .any(|c| c.starts_with("systemctl stop") || c.starts_with("userdel"))
    );
}

#[test]
fn test_uninstall_returns_host_to_absent() {
    let host = host();
    let provisioner = Provisioner::new(&host);
    provisioner.run(&spec()).unwrap();

    provisioner.uninstall(&spec(), false).unwrap();

    assert_eq!(provisioner.state(&spec()).unwrap(), HostState::Absent);
    assert!(!host.is_enabled("nomad"));
    assert!(!host.exists(Path::new(UNIT)));
    // Data and the service user survive without purge
    assert!(host.is_dir("/opt/nomad"));
    assert!(host.has_user("nomad"));

    provisioner.uninstall(&spec(), true).unwrap();
    assert!(!host.is_dir("/opt/nomad"));
    assert!(!host.has_user("nomad"));
}

#[test]
fn test_purge_removes_stamped_cni_plugins() {
    let host = host();
    let provisioner = Provisioner::new(&host);
    provisioner.run(&spec()).unwrap();
    host.write_file(Path::new("/opt/cni/bin/bridge"), b"elf", 0o755)
        .unwrap();
    host.write_file(Path::new("/opt/cni/bin/.version"), b"1.5.1\n", 0o644)
        .unwrap();

    // CNI is no longer requested but the stamped bundle still goes
    provisioner.uninstall(&spec(), true).unwrap();

    assert!(!host.exists(Path::new("/opt/cni/bin/bridge")));
    assert!(!host.exists(Path::new("/opt/cni/bin/.version")));
}

#[test]
fn test_purge_keeps_foreign_cni_plugins() {
    let host = host();
    host.write_file(Path::new("/opt/cni/bin/bridge"), b"elf", 0o755)
        .unwrap();

    let results = Provisioner::new(&host).uninstall(&spec(), true).unwrap();

    assert!(results.iter().all(|r| *r == StepResult::AlreadySatisfied));
    assert!(host.exists(Path::new("/opt/cni/bin/bridge")));
}

#[test]
fn test_state_follows_lifecycle() {
    let host = host();
    let provisioner = Provisioner::new(&host);
    assert_eq!(provisioner.state(&spec()).unwrap(), HostState::Absent);

    host.write_file(Path::new(BINARY), b"bin", 0o755).unwrap();
    assert_eq!(provisioner.state(&spec()).unwrap(), HostState::Installed);

    host.write_file(Path::new(CONFIG), b"x", 0o600).unwrap();
    assert_eq!(provisioner.state(&spec()).unwrap(), HostState::Configured);

    host.write_file(Path::new(UNIT), b"[Unit]\n", 0o644).unwrap();
    assert_eq!(provisioner.state(&spec()).unwrap(), HostState::Registered);

    host.run("systemctl", &["start", "nomad"]).unwrap();
    assert_eq!(provisioner.state(&spec()).unwrap(), HostState::Running);
}
