use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sleepmon::config::{expand_tilde, MonitorConfig};

#[derive(Parser, Debug)]
#[command(name = "sleepmon")]
#[command(about = "Sleep monitor: MJPEG fan-out, motion/vitals fusion and sleep logging", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SLEEPMON_CONFIG")]
    config: Option<PathBuf>,

    /// Listener for the raw MJPEG source (host:port)
    #[arg(long)]
    ingest_addr: Option<String>,

    /// Web server port
    #[arg(long)]
    http_port: Option<u16>,

    /// Web server port used if --http-port cannot be bound
    #[arg(long)]
    http_fallback_port: Option<u16>,

    /// Directory for sleep logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Vitals helper command line (whitespace separated)
    #[arg(long)]
    vitals_command: Option<String>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)?,
            None => MonitorConfig::default(),
        };

        if let Some(addr) = self.ingest_addr {
            config.ingest_addr = addr;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(port) = self.http_fallback_port {
            config.http_fallback_port = port;
        }
        if let Some(dir) = self.log_dir {
            config.log_dir = expand_tilde(&dir);
        }
        if let Some(cmd) = self.vitals_command {
            config.vitals_command = Some(cmd.split_whitespace().map(String::from).collect());
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "sleepmon=info",
        1 => "sleepmon=debug",
        _ => "sleepmon=trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    tracing::info!("Starting sleepmon v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.into_config()?;
    tracing::info!(
        ingest = %config.ingest_addr,
        http_port = config.http_port,
        log_dir = %config.log_dir.display(),
        "Configuration loaded"
    );

    if let Err(e) = sleepmon::app::run(config).await {
        tracing::error!(error = %e, "sleepmon stopped with an error");
        return Err(e);
    }
    Ok(())
}
