//! Nomad Init - Nomad client bootstrap
//!
//! Installs the Nomad agent on the local Linux host, points it at a server
//! and registers it with systemd. The same install plan can be rendered as
//! a bash script or cloud-init document with `show`.

mod logging;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::{env, fs};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, Color, Table, presets::UTF8_FULL_CONDENSED};
use console::{Emoji, style};
use dialoguer::Confirm;
use nomad_provision::config::{DEFAULT_CNI_VERSION, DEFAULT_VERSION};
use nomad_provision::{
    CniPlugins, ConfigSource, HostState, InstallSpec, Manifest, Provisioner, ScriptFormat,
    StepResult, SystemHost,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use progress::SpinnerReporter;

static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
static BROOM: Emoji<'_, '_> = Emoji("🧹 ", "");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");

/// Configuration file structure
/// Path: ~/.config/nomad-init/init.toml (XDG-style)
#[derive(Debug, Default, Serialize, Deserialize)]
struct Config {
    #[serde(default)]
    nomad: NomadConfig,
    #[serde(default)]
    service: ServiceConfig,
    #[serde(default)]
    paths: PathsConfig,
    #[serde(default)]
    plugins: PluginsConfig,
    #[serde(default)]
    config: TemplateConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NomadConfig {
    version: Option<String>,
    url_template: Option<String>,
    arch: Option<String>,
    interface: Option<String>,
    datacenter: Option<String>,
    server: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServiceConfig {
    user: Option<String>,
    name: Option<String>,
    grant_sudo: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PathsConfig {
    binary: Option<String>,
    config_dir: Option<String>,
    data_dir: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PluginsConfig {
    docker: Option<bool>,
    raw_exec: Option<bool>,
    cni: Option<bool>,
    cni_version: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TemplateConfig {
    source: Option<SourceKind>,
    archive_url: Option<String>,
    entry: Option<String>,
}

/// Where the agent configuration template comes from
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SourceKind {
    /// Template shipped with nomad-init
    Inline,
    /// Template file inside a remote zip archive
    Remote,
}

#[derive(Parser, Debug)]
#[command(
    name = "nomad-init",
    version,
    about = "Install and register a Nomad client agent on this host",
    disable_version_flag = true,
    args_conflicts_with_subcommands = true
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    install: InstallArgs,

    /// Config file path (global)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show config file path and exit
    #[arg(long)]
    show_config: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stop the agent and remove it from this host
    Uninstall(UninstallArgs),

    /// Print the install plan without touching the host
    Show(ShowArgs),

    /// Show how far the agent is installed on this host
    Status,
}

#[derive(Parser, Debug, Default)]
struct InstallArgs {
    /// Address of the Nomad server to join
    #[arg()]
    server: Option<String>,

    /// Nomad release to install
    #[arg(long)]
    version: Option<String>,

    /// Interface whose IPv4 address is advertised
    #[arg(short, long)]
    interface: Option<String>,

    /// Datacenter name
    #[arg(long)]
    datacenter: Option<String>,

    /// Release architecture (amd64, arm64)
    #[arg(long)]
    arch: Option<String>,

    /// Reinstall the binary even if the version is present
    #[arg(long)]
    replace: bool,

    /// Grant the service user passwordless sudo
    #[arg(long)]
    grant_sudo: bool,

    /// Disable the docker driver
    #[arg(long)]
    no_docker: bool,

    /// Enable the `raw_exec` driver
    #[arg(long)]
    raw_exec: bool,

    /// Install the CNI reference plugins
    #[arg(long)]
    cni: bool,

    /// CNI plugins release (implies --cni)
    #[arg(long)]
    cni_version: Option<String>,

    /// Agent configuration template source
    #[arg(long, value_enum)]
    config_source: Option<SourceKind>,

    /// Zip archive holding the template (remote source)
    #[arg(long)]
    config_archive_url: Option<String>,

    /// Template path inside the archive (remote source)
    #[arg(long)]
    config_entry: Option<String>,
}

#[derive(Parser, Debug)]
struct UninstallArgs {
    /// Also remove the data directory, CNI plugins and service user
    #[arg(long)]
    purge: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
}

#[derive(Parser, Debug)]
struct ShowArgs {
    /// Output format
    #[arg(value_enum)]
    format: OutputFormat,

    #[command(flatten)]
    install: InstallArgs,
}

/// Output format for show command
#[derive(ValueEnum, Clone, Debug)]
enum OutputFormat {
    /// Cloud-init YAML format
    CloudInit,
    /// Executable bash script
    Bash,
}

impl OutputFormat {
    fn script_format(&self) -> ScriptFormat {
        match self {
            Self::CloudInit => ScriptFormat::CloudInit,
            Self::Bash => ScriptFormat::Bash,
        }
    }
}

/// Config path, `$XDG_CONFIG_HOME/nomad-init/init.toml`
fn config_path() -> PathBuf {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nomad-init")
        .join("init.toml")
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let path = path.cloned().unwrap_or_else(config_path);

    if path.exists() {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(args.verbose) {
        eprintln!("{} cannot initialise logging: {e}", style("!").yellow());
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\n{CROSS} {}", style(format!("{e:#}")).red());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    // Show config path and exit
    if args.show_config {
        let path = args.config.clone().unwrap_or_else(config_path);
        println!("{FOLDER} Config: {}", path.display());
        if path.exists() {
            println!("  {CHECK} exists");
        } else {
            println!("  {} not found (will use defaults)", style("!").yellow());
        }
        return Ok(());
    }

    let file_config = load_config(args.config.as_ref())?;

    match args.command {
        Some(Commands::Uninstall(uninstall_args)) => run_uninstall(&uninstall_args, &file_config),
        Some(Commands::Show(show_args)) => run_show(&show_args, &file_config),
        Some(Commands::Status) => run_status(&file_config),
        None => run_install(&args.install, &file_config),
    }
}

fn run_install(args: &InstallArgs, config: &Config) -> Result<()> {
    let spec = resolve_spec(args, config)?;

    print_banner();
    print_spec_table(&spec);
    println!("\n{ROCKET} Installing Nomad {}...\n", spec.version);

    let host = SystemHost::new();
    let results = Provisioner::new(&host)
        .run_with(&spec, &mut SpinnerReporter::new())
        .context("Installation failed")?;

    let applied = results
        .iter()
        .filter(|r| **r == StepResult::Applied)
        .count();
    print_install_success(&spec, applied, results.len());
    Ok(())
}

fn run_uninstall(args: &UninstallArgs, config: &Config) -> Result<()> {
    let spec = resolve_paths(&InstallArgs::default(), config)?;

    if !args.yes {
        let what = if args.purge {
            format!("Remove Nomad, {} and user {}?", spec.data_dir, spec.service_user)
        } else {
            "Remove the Nomad agent from this host?".to_string()
        };
        let confirmed = Confirm::new()
            .with_prompt(what)
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("{} Aborted", style("!").yellow());
            return Ok(());
        }
    }

    println!("\n{BROOM} Removing Nomad...\n");

    let host = SystemHost::new();
    Provisioner::new(&host)
        .uninstall_with(&spec, args.purge, &mut SpinnerReporter::new())
        .context("Uninstall failed")?;

    println!("\n{CHECK} Nomad removed");
    Ok(())
}

fn run_show(args: &ShowArgs, config: &Config) -> Result<()> {
    let spec = resolve_spec(&args.install, config)?;
    let manifest = Manifest::install(&spec).context("Failed to build install plan")?;

    let text = args
        .format
        .script_format()
        .render(&manifest, console::colors_enabled())
        .context("Failed to render install plan")?;
    println!("{text}");

    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    let spec = resolve_paths(&InstallArgs::default(), config)?;
    let host = SystemHost::new();
    let state = Provisioner::new(&host)
        .state(&spec)
        .context("Failed to inspect host")?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        Cell::new("Setting").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);
    table.add_row(vec![
        Cell::new("State"),
        Cell::new(state.to_string()).fg(state_color(state)),
    ]);
    table.add_row(vec!["Binary", &spec.binary_path]);
    table.add_row(vec!["Config", &spec.config_file()]);
    table.add_row(vec!["Unit", &spec.unit_path()]);

    println!("{table}");
    Ok(())
}

fn state_color(state: HostState) -> Color {
    match state {
        HostState::Running => Color::Green,
        HostState::Absent => Color::Red,
        _ => Color::Yellow,
    }
}

/// Resolve everything but the server address.
///
/// Priority: CLI args > env vars > config file > defaults
fn resolve_paths(args: &InstallArgs, config: &Config) -> Result<InstallSpec> {
    let defaults = InstallSpec::default();

    let version = args
        .version
        .clone()
        .or_else(|| env::var("NOMAD_VERSION").ok())
        .or_else(|| config.nomad.version.clone())
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());

    let interface = args
        .interface
        .clone()
        .or_else(|| env::var("NOMAD_INTERFACE").ok())
        .or_else(|| config.nomad.interface.clone())
        .unwrap_or(defaults.interface);

    let cni_version = args
        .cni_version
        .clone()
        .or_else(|| config.plugins.cni_version.clone());
    let cni = (args.cni || cni_version.is_some() || config.plugins.cni.unwrap_or(false)).then(|| {
        CniPlugins {
            version: cni_version.unwrap_or_else(|| DEFAULT_CNI_VERSION.to_string()),
            ..CniPlugins::default()
        }
    });

    let mut builder = InstallSpec::builder()
        .version(version)
        .url_template(
            config
                .nomad
                .url_template
                .clone()
                .unwrap_or(defaults.url_template),
        )
        .arch(
            args.arch
                .clone()
                .or_else(|| config.nomad.arch.clone())
                .unwrap_or(defaults.arch),
        )
        .binary_path(config.paths.binary.clone().unwrap_or(defaults.binary_path))
        .config_dir(
            config
                .paths
                .config_dir
                .clone()
                .unwrap_or(defaults.config_dir),
        )
        .data_dir(config.paths.data_dir.clone().unwrap_or(defaults.data_dir))
        .service_user(config.service.user.clone().unwrap_or(defaults.service_user))
        .service_name(config.service.name.clone().unwrap_or(defaults.service_name))
        .interface(interface)
        .datacenter(
            args.datacenter
                .clone()
                .or_else(|| config.nomad.datacenter.clone())
                .unwrap_or(defaults.datacenter),
        )
        .docker(!args.no_docker && config.plugins.docker.unwrap_or(defaults.docker))
        .raw_exec(args.raw_exec || config.plugins.raw_exec.unwrap_or(defaults.raw_exec))
        .config_source(resolve_source(args, config)?)
        .grant_sudo(args.grant_sudo || config.service.grant_sudo.unwrap_or(false))
        .replace_existing(args.replace);

    if let Some(cni) = cni {
        builder = builder.cni(cni);
    }

    Ok(builder.build())
}

/// Resolve the full install spec, server address included
fn resolve_spec(args: &InstallArgs, config: &Config) -> Result<InstallSpec> {
    let server = args
        .server
        .clone()
        .or_else(|| env::var("NOMAD_SERVER").ok())
        .or_else(|| config.nomad.server.clone())
        .filter(|s| !s.trim().is_empty());

    let Some(server) = server else {
        bail!("No server address given (pass <SERVER>, set NOMAD_SERVER or [nomad] server)");
    };

    let spec = InstallSpec {
        server_address: server,
        ..resolve_paths(args, config)?
    };
    debug!(?spec, "resolved install spec");
    Ok(spec)
}

fn resolve_source(args: &InstallArgs, config: &Config) -> Result<ConfigSource> {
    let kind = args
        .config_source
        .or(config.config.source)
        .unwrap_or(SourceKind::Inline);

    match kind {
        SourceKind::Inline => Ok(ConfigSource::Inline),
        SourceKind::Remote => {
            let archive_url = args
                .config_archive_url
                .clone()
                .or_else(|| config.config.archive_url.clone())
                .context("Remote config source needs --config-archive-url")?;
            let entry = args
                .config_entry
                .clone()
                .or_else(|| config.config.entry.clone())
                .context("Remote config source needs --config-entry")?;
            Ok(ConfigSource::Remote { archive_url, entry })
        }
    }
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("╔═══════════════════════════════════════╗")
            .cyan()
            .bold()
    );
    println!(
        "{}",
        style("║          NOMAD CLIENT BOOTSTRAP       ║")
            .cyan()
            .bold()
    );
    println!(
        "{}",
        style("╚═══════════════════════════════════════╝")
            .cyan()
            .bold()
    );
}

fn print_spec_table(spec: &InstallSpec) {
    println!("\n{} Configuration\n", style("▸").blue().bold());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        Cell::new("Setting").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);

    table.add_row(vec!["Version", &format!("{} ({})", spec.version, spec.arch)]);
    table.add_row(vec!["Server", &spec.server_address]);
    table.add_row(vec!["Interface", &spec.interface]);
    table.add_row(vec!["Datacenter", &spec.datacenter]);
    table.add_row(vec!["Config", &spec.config_source.describe()]);

    let mut drivers = vec![];
    if spec.docker {
        drivers.push("docker".to_string());
    }
    if spec.raw_exec {
        drivers.push("raw_exec".to_string());
    }
    if let Some(cni) = &spec.cni {
        drivers.push(format!("cni {}", cni.version));
    }
    table.add_row(vec!["Plugins", &drivers.join(", ")]);

    if spec.grant_sudo {
        table.add_row(vec![
            Cell::new("Sudo"),
            Cell::new(format!("{} (passwordless)", spec.service_user)).fg(Color::Yellow),
        ]);
    }

    println!("{table}");
}

fn print_install_success(spec: &InstallSpec, applied: usize, total: usize) {
    println!();
    if applied == 0 {
        println!("{CHECK} Already up to date ({total} steps unchanged)");
    } else {
        println!("{SPARKLE} Nomad client installed ({applied}/{total} steps applied)");
    }
    println!();
    println!("  {}", style("Service:").bold());
    println!("    systemctl status {}", spec.service_name);
    println!("    journalctl -u {} -f", spec.service_name);
    println!();
    println!("  {}", style("Config:").bold());
    println!("    {}", spec.config_file());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("nomad-init").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_positional_server_is_install() {
        let args = parse(&["10.0.0.1", "--raw-exec", "--version", "1.9.7"]);

        assert!(args.command.is_none());
        assert_eq!(args.install.server.as_deref(), Some("10.0.0.1"));
        assert_eq!(args.install.version.as_deref(), Some("1.9.7"));
        assert!(args.install.raw_exec);
    }

    #[test]
    fn test_subcommand_wins_over_server() {
        let args = parse(&["show", "bash", "10.0.0.1"]);

        match args.command {
            Some(Commands::Show(show)) => {
                assert!(matches!(show.format, OutputFormat::Bash));
                assert_eq!(show.install.server.as_deref(), Some("10.0.0.1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_overrides_file() {
        let config: Config = toml::from_str(
            r#"
            [nomad]
            version = "1.8.0"
            datacenter = "eu"
            server = "10.9.9.9"

            [plugins]
            docker = false
            "#,
        )
        .unwrap();
        let args = InstallArgs {
            server: Some("10.0.0.1".into()),
            version: Some("1.10.0".into()),
            ..InstallArgs::default()
        };

        let spec = resolve_spec(&args, &config).unwrap();

        assert_eq!(spec.version, "1.10.0");
        assert_eq!(spec.server_address, "10.0.0.1");
        assert_eq!(spec.datacenter, "eu");
        assert!(!spec.docker);
    }

    #[test]
    fn test_cni_version_implies_cni() {
        let args = InstallArgs {
            server: Some("10.0.0.1".into()),
            cni_version: Some("1.6.0".into()),
            ..InstallArgs::default()
        };

        let spec = resolve_spec(&args, &Config::default()).unwrap();

        assert_eq!(spec.cni.map(|c| c.version).as_deref(), Some("1.6.0"));
    }

    #[test]
    fn test_remote_source_needs_archive() {
        let args = InstallArgs {
            server: Some("10.0.0.1".into()),
            config_source: Some(SourceKind::Remote),
            ..InstallArgs::default()
        };

        let err = resolve_spec(&args, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("--config-archive-url"));
    }

    #[test]
    fn test_remote_source_from_file() {
        let config: Config = toml::from_str(
            r#"
            [config]
            source = "remote"
            archive_url = "https://example.test/main.zip"
            entry = "nomad/client.hcl"
            "#,
        )
        .unwrap();
        let args = InstallArgs {
            server: Some("10.0.0.1".into()),
            ..InstallArgs::default()
        };

        let spec = resolve_spec(&args, &config).unwrap();

        assert_eq!(
            spec.config_source,
            ConfigSource::Remote {
                archive_url: "https://example.test/main.zip".into(),
                entry: "nomad/client.hcl".into(),
            }
        );
    }
}
