#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use std::{process::ExitCode, sync::Arc};
use tracing_subscriber::prelude::*;
use wallet_session::{
    cli_output::{print_error, print_json},
    network,
    paths::SessionPaths,
    provider::StaticProvider,
    registry::FileRegistry,
    selection_cache::FileStore,
    store::ConfigStore,
    AuthState, ErrorReport, SessionCoordinator, SessionError, UserId,
};

#[derive(Parser, Debug)]
#[command(name = "wallet-session", version)]
struct Cli {
    /// Session owner. Each user has an independent registry.
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved config/data/log paths (JSON).
    Paths,
    /// List supported networks (JSON).
    Networks,
    /// Restore the session and print a snapshot.
    Status,
    /// List registered wallets in registry order.
    List,
    /// Connect a wallet as if a provider reported `--account` on `--network`.
    Connect {
        /// Authorized account; repeat to report several (the first one is used).
        #[arg(long = "account", required = true)]
        accounts: Vec<String>,
        /// Network reported by the provider (canonical id or legacy name).
        #[arg(long)]
        network: Option<String>,
    },
    /// Make a registered wallet active.
    Switch { address: String },
    /// Switch the active network.
    Network { network: String },
    /// Remove a wallet from the registry.
    Disconnect { address: String },
    /// Mark a wallet as the primary one.
    Primary { address: String },
    /// Set a wallet label. Omit the label to clear it.
    Label {
        address: String,
        label: Option<String>,
    },
}

fn init_logging(paths: &SessionPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("wallet-session.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Failure of a session command: structured errors are reported as JSON, anything else is
/// plumbing and goes through eyre.
enum CommandError {
    Session(SessionError),
    Other(eyre::Report),
}

impl From<SessionError> for CommandError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl From<eyre::Report> for CommandError {
    fn from(e: eyre::Report) -> Self {
        Self::Other(e)
    }
}

async fn open_session(
    paths: &SessionPaths,
    user: &str,
    provider: Option<Arc<StaticProvider>>,
) -> Result<SessionCoordinator, CommandError> {
    let config = ConfigStore::new(paths).load_or_init_default()?;
    let registry = Arc::new(FileRegistry::new(paths.registry_dir()));
    let store = Arc::new(FileStore::new(paths.local_storage_file()));
    let mut builder = SessionCoordinator::builder(registry, store).config(config);
    if let Some(p) = provider {
        builder = builder.provider(p);
    }
    let session = builder.build();
    session
        .restore(AuthState::Authenticated(UserId::new(user)))
        .await?;
    Ok(session)
}

async fn run_session_command(
    paths: &SessionPaths,
    user: &str,
    cmd: Command,
) -> Result<serde_json::Value, CommandError> {
    let provider = if let Command::Connect {
        accounts,
        network: reported,
    } = &cmd
    {
        Some(Arc::new(StaticProvider::new(
            accounts.clone(),
            reported
                .clone()
                .unwrap_or_else(|| network::DEFAULT_NETWORK_ID.to_owned()),
        )))
    } else {
        None
    };
    let session = open_session(paths, user, provider).await?;

    let out = match cmd {
        Command::Status => serde_json::to_value(session.snapshot()),
        Command::List => serde_json::to_value(session.wallets()),
        Command::Connect { .. } => serde_json::to_value(session.connect().await?),
        Command::Switch { address } => serde_json::to_value(session.switch_wallet(&address)?),
        Command::Network { network } => {
            session.switch_network(&network)?;
            serde_json::to_value(session.snapshot())
        }
        Command::Disconnect { address } => {
            serde_json::to_value(session.disconnect(&address).await?)
        }
        Command::Primary { address } => {
            session.set_primary(&address)?;
            session.drain().await;
            serde_json::to_value(session.wallets())
        }
        Command::Label { address, label } => {
            serde_json::to_value(session.update_label(&address, label.as_deref()).await?)
        }
        Command::Paths | Command::Networks => {
            return Err(eyre::eyre!("not a session command").into());
        }
    }
    .context("serialize output")?;

    session.drain().await;
    Ok(out)
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = SessionPaths::discover()?;
    paths.ensure_private_dirs().context("create session dirs")?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Paths => {
            print_json(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Networks => {
            print_json(&network::catalog())?;
            Ok(ExitCode::SUCCESS)
        }
        cmd => match run_session_command(&paths, &cli.user, cmd).await {
            Ok(v) => {
                print_json(&v)?;
                Ok(ExitCode::SUCCESS)
            }
            Err(CommandError::Session(e)) => {
                print_error(&ErrorReport::from(e));
                Ok(ExitCode::FAILURE)
            }
            Err(CommandError::Other(e)) => Err(e),
        },
    }
}
