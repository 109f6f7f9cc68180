//! cardgate native-messaging host

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use cardgate_host::card::PcscBackend;
use cardgate_host::config::{Config, SignerKind};
use cardgate_host::dispatch::Dispatcher;
use cardgate_host::protocol::Negotiation;
use cardgate_host::signer::{KeystoreSigner, Signer, UnavailableSigner};
use clap::Parser;
use eyre::WrapErr;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Native-messaging host for smart-card authentication and signing")]
struct Cli {
    /// Arguments passed by the browser (extension origin, manifest path)
    caller: Vec<String>,

    /// Native window handle of the calling browser (Chrome on Windows)
    #[arg(long)]
    parent_window: Option<String>,

    /// Configuration file (default: ~/.cardgate/cardgate.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wire generation to speak
    #[arg(long, value_enum)]
    protocol: Option<Negotiation>,

    /// Trace level output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    if io::stdin().is_terminal() {
        eyre::bail!("This is not a regular program, it is expected to be run from a browser");
    }

    let mut config = Config::load(cli.config.as_deref()).wrap_err("failed to load configuration")?;
    if let Some(protocol) = cli.protocol {
        config.protocol = protocol;
    }
    setup_logging(cli.verbose, config.log_file.as_deref())?;

    info!(
        version = cardgate_host::VERSION,
        caller = ?cli.caller,
        parent_window = ?cli.parent_window,
        protocol = ?config.protocol,
        "Starting native host"
    );

    match config.signer.kind {
        SignerKind::None => serve(UnavailableSigner, &config),
        SignerKind::Keystore => {
            let (key, certificate) = config.signer.keystore_paths()?;
            let signer = KeystoreSigner::from_files(
                key,
                certificate,
                config.signer.signing_certificate.as_deref(),
            )
            .wrap_err("failed to load keystore signer")?;
            serve(signer, &config)
        }
    }
}

fn serve<S: Signer>(signer: S, config: &Config) -> eyre::Result<()> {
    let backend = PcscBackend::new(config.card.connect_strategy()?, config.card.pcsc_config());
    let mut dispatcher = Dispatcher::new(signer, backend)
        .with_negotiation(config.protocol)
        .with_token_lifetime(Duration::from_secs(config.token.lifetime_secs))
        .with_max_message_size(config.max_message_size);

    dispatcher.serve(io::stdin().lock(), io::stdout().lock())?;
    Ok(())
}

// stdout carries protocol frames, so logs go to stderr or a file
fn setup_logging(verbose: bool, log_file: Option<&Path>) -> eyre::Result<()> {
    let filter = if verbose {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("failed to open log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}
