//! Portward daemon - supervise kubectl port-forward tunnels.
//!
//! Loads the declarative tunnel configuration, converges the live tunnel
//! set against it, serves the dashboard, and reloads whenever the file
//! changes on disk.

mod logging;
mod watcher;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use portward_core::{Config, TunnelManager, DEFAULT_LISTEN_PORT};

use crate::watcher::ConfigWatcher;
use crate::web::Dashboard;

#[derive(Parser)]
#[command(name = "portward")]
#[command(author, version, about = "Supervise kubectl port-forward tunnels")]
struct Cli {
    /// Configuration file with the desired tunnel set
    #[arg(short, long, default_value = "forwards.yaml")]
    config: PathBuf,

    /// Dashboard listen port; the config file's `port` key takes precedence
    #[arg(short, long, default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,

    /// Default log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level);

    // A configuration that fails to load at startup is fatal.
    let config = Config::load(&cli.config, cli.port).await?;

    let manager = Arc::new(TunnelManager::new(cli.config.clone(), cli.port));
    manager.reconcile(config).await;
    manager.start_keepalive().await;

    let mut dashboard = spawn_dashboard(Arc::clone(&manager));
    info!(
        "Listening on http://127.0.0.1:{}/. Ctrl-C to stop.",
        manager.dashboard_settings().port
    );

    let mut watcher = ConfigWatcher::new(&cli.config)?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = watcher.changed() => {
                if !changed {
                    break;
                }
                info!("Configuration file changed, reloading");
                let outcome = manager.reload_config().await;
                if outcome.dashboard_changed() {
                    info!("Dashboard settings changed, rebuilding listener");
                    dashboard.shutdown().await;
                    dashboard = spawn_dashboard(Arc::clone(&manager));
                }
            }
        }
    }

    // Scheduler first, then tunnels, then the listener.
    manager.shutdown().await;
    dashboard.shutdown().await;
    Ok(())
}

struct DashboardHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl DashboardHandle {
    /// Releases the listener and waits for the server task to finish.
    async fn shutdown(self) {
        let _ = self.stop_tx.send(());
        let _ = self.task.await;
    }
}

/// Spawns a dashboard server for the manager's current settings snapshot.
fn spawn_dashboard(manager: Arc<TunnelManager>) -> DashboardHandle {
    let settings = manager.dashboard_settings();
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let dashboard = Dashboard::new(manager, settings);
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = dashboard.run_with_shutdown(shutdown).await {
            error!(error = %e, "Dashboard server error");
        }
    });
    DashboardHandle { stop_tx, task }
}
