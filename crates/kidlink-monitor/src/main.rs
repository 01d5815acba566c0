//! KidLink monitor: command-line entry point.
//!
//! Runs a parent and a child device side by side in one process, paired over
//! the in-process loopback transport with a simulated phone behind the
//! child.  Useful for watching the pairing handshake, the permission prompts
//! and the telemetry stream without any hardware.
//!
//! # Usage
//!
//! ```text
//! kidlink-monitor [--config <PATH>] generate-code
//! kidlink-monitor [--config <PATH>] demo [--code <CODE>] [--duration-secs <N>]
//!                                        [--frequency-ms <MS>] [--permission <KIND>]...
//! ```
//!
//! | Variable               | Default          | Description                 |
//! |------------------------|------------------|-----------------------------|
//! | `KIDLINK_CONFIG`       | `kidlink.toml`   | Config file (may not exist) |
//! | `KIDLINK_PAIRING_CODE` | random           | Code used by `demo`         |
//! | `RUST_LOG`             | config `logging` | Log filter                  |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use kidlink_core::{ConnectionState, PairingCode, Payload, Role};
use kidlink_session::infrastructure::capability::simulated::SimulatedCapabilityProvider;
use kidlink_session::infrastructure::storage::config::AppConfig;
use kidlink_session::infrastructure::transport::loopback::LoopbackTransport;
use kidlink_session::Device;
use serde_json::Map;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Parent/child pairing monitor for KidLink.
#[derive(Debug, Parser)]
#[command(name = "kidlink-monitor", version)]
struct Cli {
    /// TOML configuration file.  A missing file means "all defaults".
    #[arg(long, default_value = "kidlink.toml", env = "KIDLINK_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a fresh 6-digit pairing code.
    GenerateCode,

    /// Pair a simulated parent and child and log the traffic between them.
    Demo {
        /// Pairing code to use; a random one is generated when omitted.
        #[arg(long, env = "KIDLINK_PAIRING_CODE")]
        code: Option<String>,

        /// Stop after this many seconds.  Runs until Ctrl-C when omitted.
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Override the telemetry interval once connected.  Must be at least 1.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        frequency_ms: Option<u64>,

        /// Permissions the parent requests after pairing.
        #[arg(long = "permission", default_values = ["location", "gallery"])]
        permissions: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    // `RUST_LOG` wins; otherwise the level from the config file.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.level)
            .with_context(|| format!("invalid log level {:?}", config.logging.level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::GenerateCode => {
            println!("{}", PairingCode::generate());
            Ok(())
        }
        Commands::Demo {
            code,
            duration_secs,
            frequency_ms,
            permissions,
        } => {
            let code = code.unwrap_or_else(|| PairingCode::generate().to_string());
            run_demo(
                &config,
                &code,
                duration_secs.map(Duration::from_secs),
                frequency_ms.map(Duration::from_millis),
                &permissions,
            )
            .await
        }
    }
}

async fn run_demo(
    config: &AppConfig,
    code: &str,
    duration: Option<Duration>,
    frequency: Option<Duration>,
    permissions: &[String],
) -> anyhow::Result<()> {
    let transport = LoopbackTransport::new(config.loopback_config());
    let parent = Device::new(
        Arc::new(transport.clone()),
        Arc::new(SimulatedCapabilityProvider::new(config.simulated_config())),
        config.session_config(),
    );
    let child = Device::new(
        Arc::new(transport),
        Arc::new(SimulatedCapabilityProvider::new(config.simulated_config())),
        config.session_config(),
    );

    let (state_tx, mut state_rx) = watch::channel(ConnectionState::Idle);
    parent.session().on_connection_state_changed(move |state| {
        info!(?state, "parent connection state");
        let _ = state_tx.send(state);
    });
    parent.session().on_message_received(|payload| {
        if let Payload::Telemetry(message) = payload {
            info!(
                kind = message.type_tag(),
                at = %message.timestamp(),
                "parent received telemetry"
            );
        }
    });

    info!(%code, "pairing parent and child");
    parent
        .begin(Role::Parent, code)
        .context("starting the parent session")?;
    child
        .begin(Role::Child, code)
        .context("starting the child session")?;

    let reached = state_rx
        .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected))
        .await
        .map(|s| *s)
        .context("parent session dropped")?;
    if reached != ConnectionState::Connected {
        bail!("pairing with code {code} failed");
    }
    info!("paired");

    if let Some(frequency) = frequency {
        child.streamer().set_frequency(frequency);
    }

    for kind in permissions {
        match parent.request_permission(kind).await {
            Ok(granted) => info!(permission = %kind, granted, "permission negotiated"),
            Err(e) => warn!(permission = %kind, error = %e, "permission request failed"),
        }
    }
    parent
        .send_command("get_app_usage", Map::new())
        .context("sending get_app_usage")?;

    let until_done = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = until_done => info!("demo duration elapsed"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("shutdown signal received");
        }
        _ = state_rx.wait_for(|s| *s == ConnectionState::Disconnected) => {
            warn!("peer went away");
        }
    }

    info!(
        buffered = parent.received().len(),
        permissions = ?parent.permission_status(),
        "stopping"
    );
    parent.disconnect();
    Ok(())
}
