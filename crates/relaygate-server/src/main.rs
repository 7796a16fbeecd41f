//! relaygate: peer access control for a TURN/STUN relay gateway.
//!
//! Loads cluster definitions, keeps `STRICT_DNS` domains resolved in the
//! background, and answers whether a peer address may receive relayed
//! traffic for a given cluster.

mod cluster;
mod config;
mod manager;
mod resolver;
#[cfg(test)]
mod testutil;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cluster::ClusterFactory;
use config::GatewayConfig;
use manager::{ClusterManager, ReconcileSummary};
use resolver::{CachingResolver, DnsResolver};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// relaygate — TURN/STUN relay gateway peer access control
#[derive(Parser, Debug)]
#[command(name = "relaygate", version, about = "TURN/STUN relay gateway peer access control")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.relaygate/config.toml")]
    config: String,

    /// Seconds between DNS refreshes (overrides the config file)
    #[arg(long)]
    refresh_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve: keep clusters resolved, reload on SIGHUP (default)
    Run,
    /// Print the live configuration of every cluster as JSON
    Dump,
    /// Decide whether a cluster permits relaying to a peer
    Check {
        /// Cluster name
        cluster: String,
        /// Peer IP address
        peer: IpAddr,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "relaygate failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = PathBuf::from(&cli.config);
    let gateway_config = GatewayConfig::load(&config_path, cli.refresh_interval)
        .context("failed to load config")?;

    let resolver = Arc::new(CachingResolver::new(gateway_config.resolver));
    let shared: Arc<dyn DnsResolver> = resolver.clone();
    let manager = ClusterManager::new(ClusterFactory::new(Some(shared)));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                config = %gateway_config.path.display(),
                "starting relaygate"
            );
            let handle = resolver.clone().spawn();
            apply(&manager, &gateway_config)?;

            serve(&manager, &config_path, cli.refresh_interval).await;

            manager.close_all().context("failed to close clusters")?;
            handle.stop().await;
            info!("relaygate stopped");
        }
        Command::Dump => {
            apply(&manager, &gateway_config)?;
            println!("{}", serde_json::to_string_pretty(&manager.configs())?);
            manager.close_all()?;
        }
        Command::Check { cluster, peer } => {
            apply(&manager, &gateway_config)?;
            let Some(target) = manager.get(&cluster) else {
                anyhow::bail!("unknown cluster {cluster:?}");
            };
            resolver.refresh().await;
            let allowed = manager.route(&cluster, peer);
            println!(
                "{cluster} ({}) {peer} {}",
                target.cluster_type(),
                if allowed { "allowed" } else { "denied" }
            );
            manager.close_all()?;
        }
    }

    Ok(())
}

/// Reconcile the cluster set against `config` and log the outcome.
fn apply(manager: &ClusterManager, config: &GatewayConfig) -> anyhow::Result<ReconcileSummary> {
    let summary = manager
        .reconcile(&config.clusters)
        .context("failed to reconcile clusters")?;

    info!(
        created = summary.created.len(),
        updated = summary.updated.len(),
        deleted = summary.deleted.len(),
        "clusters reconciled"
    );
    for (name, reason) in &summary.failed {
        warn!(cluster = %name, error = %reason, "cluster configuration rejected");
    }
    if summary.needs_restart() {
        warn!(clusters = ?summary.restart_required, "changes pending a restart");
    }

    Ok(summary)
}

/// Run until SIGINT/SIGTERM, reloading the config file on SIGHUP.
async fn serve(manager: &ClusterManager, config_path: &std::path::Path, refresh: Option<u64>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGHUP handler, reload disabled");
                shutdown_signal().await;
                info!("received shutdown signal");
                return;
            }
        };

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("received shutdown signal");
                    return;
                }
                _ = sighup.recv() => {
                    info!("received SIGHUP, reloading config");
                    match GatewayConfig::load(config_path, refresh) {
                        Ok(config) => {
                            if let Err(e) = apply(manager, &config) {
                                error!(error = %format!("{e:#}"), "reload failed");
                            }
                        }
                        Err(e) => error!(error = %e, "reload failed, keeping current config"),
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (manager, config_path, refresh);
        shutdown_signal().await;
        info!("received shutdown signal");
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
