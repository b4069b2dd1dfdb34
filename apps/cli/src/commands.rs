//! CLI command definitions, routing, and tracing setup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;
use woof_core::payload::Payload;
use woof_core::pipeline::{ProgressReporter, ShareResult};
use woof_shared::{
    AppConfig, CompressionLevel, ShareConfig, init_config, load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// woof in Rust, send any number of files/directories over a local network quickly.
#[derive(Parser)]
#[command(
    name = "woof-rs",
    version,
    about = "Send any number of files/directories over a local network quickly.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to read instead of ~/.woof-rs/woof.toml.
    #[arg(long = "config", env = "WOOF_CONFIG", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub share: ShareArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Arguments for the default (share) action.
#[derive(Args, Debug)]
pub(crate) struct ShareArgs {
    /// Files or directories to send.
    pub paths: Vec<PathBuf>,

    /// Address to listen on.
    #[arg(short, long)]
    pub ip: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of downloads to serve before exiting.
    #[arg(short, long)]
    pub count: Option<u32>,

    /// Gzip level for bundles: none, fast, default, or best.
    #[arg(long)]
    pub compression: Option<CompressionLevel>,

    /// File name offered for bundles.
    #[arg(long)]
    pub archive_name: Option<String>,
}

impl ShareArgs {
    /// Merge flags over config-file values.
    fn to_share_config(&self, app: &AppConfig) -> ShareConfig {
        let mut config = ShareConfig::from(app);
        config.paths = self.paths.clone();
        if let Some(ip) = &self.ip {
            config.ip = ip.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(count) = self.count {
            config.count = count;
        }
        if let Some(compression) = self.compression {
            config.compression = compression;
        }
        if let Some(name) = &self.archive_name {
            config.archive_name = name.clone();
        }
        config
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "woof=info",
        1 => "woof=debug",
        _ => "woof=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config_file.as_ref()),
        },
        None => cmd_share(&cli.share, cli.config_file.as_ref()).await,
    }
}

fn resolve_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_share(args: &ShareArgs, config_path: Option<&PathBuf>) -> Result<()> {
    let app = resolve_config(config_path)?;
    let config = args.to_share_config(&app);

    info!(
        paths = config.paths.len(),
        addr = %config.bind_addr(),
        count = config.count,
        "sharing"
    );

    let reporter = CliProgress::new();
    let result = woof_core::pipeline::share(&config, &reporter, shutdown_signal()).await?;

    println!();
    if result.interrupted {
        println!("  Share stopped before all downloads completed.");
    } else {
        println!("  Share complete!");
    }
    println!("  File:      {} ({})", result.download_name, result.kind);
    println!("  Size:      {} bytes", result.size);
    println!("  SHA-256:   {}", result.sha256);
    println!("  Downloads: {}/{}", result.stats.downloads, config.count);
    if result.stats.rejected > 0 || result.stats.failed > 0 {
        println!(
            "  Rejected:  {} (failed: {})",
            result.stats.rejected, result.stats.failed
        );
    }
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

/// Resolves on Ctrl-C. Never resolves when the signal cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// CLI progress reporter using an indicatif spinner that turns into a
/// byte bar while a client is downloading.
struct CliProgress {
    bar: ProgressBar,
    payload_size: AtomicU64,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self {
            bar,
            payload_size: AtomicU64::new(0),
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(SPINNER_TICKS)
}

fn transfer_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .tick_strings(SPINNER_TICKS)
    .progress_chars("=> ")
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn payload_ready(&self, payload: &Payload) {
        self.payload_size.store(payload.size, Ordering::Relaxed);
        if payload.is_temporary() {
            self.bar
                .println(format!("{} written successfully!", payload.download_name));
        }
        for path in &payload.skipped {
            self.bar
                .println(format!("Skipped {}: not a valid path", path.display()));
        }
    }

    fn listening(&self, url: &Url, lan_url: Option<&Url>) {
        self.bar.println(format!("Serving at {url}"));
        if let Some(lan) = lan_url {
            self.bar.println(format!("Reachable on your network at {lan}"));
        }
        self.bar.set_message("Waiting for downloads");
    }

    fn client_connected(&self, peer: SocketAddr) {
        self.bar.set_message(format!("Client {peer}"));
    }

    fn bytes_sent(&self, sent: u64, total: u64) {
        if self.bar.length() != Some(total) {
            self.bar.set_style(transfer_style());
            self.bar.set_length(total);
        }
        self.bar.set_position(sent);
    }

    fn download_complete(&self, peer: SocketAddr, served: u32, count: u32) {
        self.bar.println(format!(
            "Sent {} bytes to {peer} ({served}/{count})",
            self.payload_size.load(Ordering::Relaxed)
        ));
        self.bar.set_style(spinner_style());
        self.bar.unset_length();
        self.bar.set_position(0);
        self.bar.set_message("Waiting for downloads");
    }

    fn done(&self, _result: &ShareResult) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_original_flags() {
        let cli = Cli::try_parse_from(["woof-rs", "-i", "0.0.0.0", "-p", "9000", "a.txt", "b"])
            .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.share.paths, vec![PathBuf::from("a.txt"), PathBuf::from("b")]);
        assert_eq!(cli.share.ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.share.port, Some(9000));
    }

    #[test]
    fn flags_override_config_defaults() {
        let cli = Cli::try_parse_from([
            "woof-rs",
            "--count",
            "3",
            "--compression",
            "best",
            "--archive-name",
            "bundle.tgz",
            "dir",
        ])
        .unwrap();

        let mut app = AppConfig::default();
        app.defaults.port = 9999;
        let config = cli.share.to_share_config(&app);

        assert_eq!(config.port, 9999);
        assert_eq!(config.ip, "127.0.0.1");
        assert_eq!(config.count, 3);
        assert_eq!(config.compression, CompressionLevel::Best);
        assert_eq!(config.archive_name, "bundle.tgz");
    }

    #[test]
    fn rejects_unknown_compression() {
        assert!(Cli::try_parse_from(["woof-rs", "--compression", "max", "f"]).is_err());
    }

    #[test]
    fn config_subcommand_parses() {
        let cli = Cli::try_parse_from(["woof-rs", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config {
                action: ConfigAction::Show
            })
        ));
    }
}
