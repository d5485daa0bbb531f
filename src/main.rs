// ABOUTME: Main entry point for clawlink: CLI parsing, logging setup and connector lifecycle
// ABOUTME: Subcommands run the agent on a channel, verify an owner, or reset a bound identity

use anyhow::Result;
use clap::{Parser, Subcommand};
use clawlink::app;
use clawlink::config::Config;
use clawlink::turn::EchoAgent;
use clawlink_core::{ChannelKind, GateMode, ListenExit};
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "clawlink", version, about = "One owner, one agent, many chat surfaces")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable debug logging (RUST_LOG still wins when set)
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// Connector to use instead of the configured one
    #[arg(long, global = true)]
    connector: Option<ChannelKind>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the agent on the selected connector (default)
    Run,
    /// Bind the owner of the selected connector, then exit
    Verify,
    /// Forget the bound owner of a channel
    ResetIdentity {
        /// terminal, telegram, slack, matrix or whatsapp
        channel: ChannelKind,
    },
}

/// Install stderr and daily-rolling file logging; the guard must live until exit
fn init_logging(debug: bool, log_dir: &Path) -> Option<WorkerGuard> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Keep matrix-sdk's crypto chatter out of the default output
        format!(
            "{},matrix_sdk_crypto::backups=error,matrix_sdk_crypto::session_manager::sessions=error",
            default_level
        )
        .into()
    });

    let (file_layer, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, "clawlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(e) => {
            eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn describe_metrics() {
    use clawlink::metrics as names;
    metrics::describe_counter!(
        names::INBOUND_DISPATCHED,
        "Inbound events handed to the agent"
    );
    metrics::describe_counter!(
        names::INBOUND_DISCARDED,
        "Inbound events dropped by the authorization gate or echo suppression"
    );
    metrics::describe_counter!(names::CHUNKS_SENT, "Outbound text chunks delivered");
    metrics::describe_counter!(
        names::DELIVERY_FAILURES,
        "Outbound deliveries that failed or timed out"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load()?;
    let _log_guard = init_logging(cli.debug, &config.log_dir());
    describe_metrics();

    let channel = cli.connector.unwrap_or(config.connector);
    tracing::debug!(?config, "Configuration loaded");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            app::run_channel(&config, channel, GateMode::Serve, Arc::new(EchoAgent)).await?;
        }
        Command::Verify => {
            let exit =
                app::run_channel(&config, channel, GateMode::VerifyOnly, Arc::new(EchoAgent))
                    .await?;
            match exit {
                ListenExit::Verified => println!("✅ {} owner verified", channel),
                ListenExit::AlreadyVerified => println!("✅ {} owner was already verified", channel),
                ListenExit::Closed | ListenExit::Stopped => {
                    anyhow::bail!("{} closed before an owner was verified", channel)
                }
            }
        }
        Command::ResetIdentity { channel } => {
            let store = app::open_identity_store(&config)?;
            app::reset_identity(store.as_ref(), channel)?;
        }
    }

    Ok(())
}
