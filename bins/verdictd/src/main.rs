// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Verdict daemon (verdictd)
//!
//! Runs the validation aggregator over a partitioned log and exposes an HTTP
//! ingress for verdicts and orders.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use verdict_config::{ConfigService, ConfigStore, FsConfigStore};
use verdict_core::EngineConfig;
use verdict_engine::{Engine, FsStateStore, StateStore};

mod api;

/// Config key the engine settings are stored under.
const CONFIG_KEY: &str = "engine";

/// Engine settings given on the command line; they win over the stored config.
#[derive(clap::Args, Debug, Default, Clone, Copy)]
struct Overrides {
    /// PASS verdicts needed to validate an order
    #[arg(long)]
    required_rules: Option<u32>,
    /// Session inactivity gap in milliseconds
    #[arg(long)]
    session_gap_ms: Option<u64>,
    /// Join skew tolerance in milliseconds
    #[arg(long)]
    join_skew_ms: Option<u64>,
    /// Partitions of both input topics
    #[arg(long)]
    partitions: Option<u32>,
}

impl Overrides {
    fn apply(self, config: &mut EngineConfig) {
        if let Some(n) = self.required_rules {
            config.required_rule_count = n;
        }
        if let Some(ms) = self.session_gap_ms {
            config.session_gap_ms = ms;
            // grace must keep covering the gap
            config.join_grace_ms = config.join_grace_ms.max(ms);
        }
        if let Some(ms) = self.join_skew_ms {
            config.join_skew_ms = ms;
        }
        if let Some(n) = self.partitions {
            config.partitions = n;
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Verdict validation aggregator daemon")]
struct Args {
    /// Log location: a directory, `file://<dir>`, or `memory:`
    #[arg(long, default_value = "memory:")]
    bootstrap: String,
    /// Directory for partition checkpoints
    #[arg(long, default_value = "verdict-state")]
    state_dir: PathBuf,
    /// HTTP listener for the ingress API
    #[arg(long, default_value = "127.0.0.1:8790")]
    listen: SocketAddr,
    /// Config directory (defaults to the platform config dir)
    #[arg(long)]
    config_dir: Option<PathBuf>,
    #[command(flatten)]
    overrides: Overrides,
    /// Wipe local checkpoints before starting
    #[arg(long)]
    clean_state: bool,
}

/// Stored engine config (defaults persisted on first run) with `overrides` applied.
fn resolve_config<S: ConfigStore>(
    service: &ConfigService<S>,
    overrides: Overrides,
) -> Result<EngineConfig> {
    let mut config = service
        .load_or_init::<EngineConfig>(CONFIG_KEY)
        .context("load engine config")?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let store = match &args.config_dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    match store {
        Ok(store) => resolve_config(&ConfigService::new(store), args.overrides),
        Err(err) => {
            warn!(%err, "config dir unavailable; using defaults");
            let mut config = EngineConfig::default();
            args.overrides.apply(&mut config);
            config.validate()?;
            Ok(config)
        }
    }
}

async fn shutdown_signal(engine: Arc<Engine>) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("ctrl-c received; shutting down"),
            Err(err) => error!(%err, "failed to listen for ctrl-c; shutting down"),
        },
        err = engine.wait_failed() => error!(%err, "engine failed; shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = load_config(&args)?;
    info!(
        bootstrap = %args.bootstrap,
        state_dir = %args.state_dir.display(),
        required_rules = config.required_rule_count,
        partitions = config.partitions,
        "starting verdictd"
    );

    if args.clean_state {
        FsStateStore::open(&args.state_dir)?.clear()?;
    }

    let engine = Arc::new(
        Engine::start(&args.bootstrap, &args.state_dir, config)
            .await
            .context("engine startup")?,
    );

    let listener = TcpListener::bind(args.listen).await?;
    info!("http ingress listening on {}", listener.local_addr()?);
    axum::serve(listener, api::router(Arc::clone(&engine)))
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&engine)))
        .await?;

    let failure = engine.failed();
    let engine = Arc::try_unwrap(engine).map_err(|_| anyhow!("engine still shared at shutdown"))?;
    engine.stop().await?;
    if let Some((worker, reason)) = failure {
        return Err(anyhow!("partition {worker} failed: {reason}"));
    }
    info!("verdictd stopped");
    Ok(())
}
