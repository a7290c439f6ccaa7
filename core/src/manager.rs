//! Tunnel manager: reconciliation and the operator control surface.
//!
//! The manager owns the registry, the keep-alive scheduler, and the most
//! recently applied configuration snapshot. Reconciliation converges the
//! live tunnel set to a freshly loaded snapshot with the minimum possible
//! disruption: unchanged identities are never touched.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::keepalive::KeepAlive;
use crate::registry::TunnelRegistry;
use crate::tunnel::{Tunnel, TunnelSpec, TunnelView};

/// Side effects of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOutcome {
    pub added: usize,
    pub removed: usize,
    /// The dashboard listener must be rebuilt on a new port.
    pub listen_port_changed: bool,
    /// The dashboard refresh cadence changed; its listener is rebuilt too.
    pub refresh_interval_changed: bool,
    /// The keep-alive scheduler was swapped to a new cadence.
    pub keep_alive_changed: bool,
}

impl ReconcileOutcome {
    /// Whether the dashboard listener needs a teardown-and-rebuild.
    pub fn dashboard_changed(&self) -> bool {
        self.listen_port_changed || self.refresh_interval_changed
    }
}

/// Settings the dashboard needs from the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardSettings {
    pub port: u16,
    pub refresh_interval: Duration,
}

/// Supervises the live tunnel set against the declarative configuration.
pub struct TunnelManager {
    registry: Arc<TunnelRegistry>,
    keepalive: KeepAlive,
    config_path: PathBuf,
    default_port: u16,
    kubectl_bin: PathBuf,
    current: RwLock<Config>,
}

impl TunnelManager {
    /// Creates a manager driving tunnels through `kubectl` on `$PATH`.
    pub fn new(config_path: PathBuf, default_port: u16) -> Self {
        Self::with_kubectl(config_path, default_port, PathBuf::from("kubectl"))
    }

    /// Creates a manager driving tunnels through a specific binary.
    pub fn with_kubectl(config_path: PathBuf, default_port: u16, kubectl_bin: PathBuf) -> Self {
        let registry = Arc::new(TunnelRegistry::new());
        Self {
            keepalive: KeepAlive::new(Arc::clone(&registry)),
            registry,
            config_path,
            default_port,
            kubectl_bin,
            current: RwLock::new(Config::empty(default_port)),
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Converges the registry to a freshly loaded snapshot.
    ///
    /// Tunnels whose identity left the snapshot are stopped and removed;
    /// new identities are inserted and started when flagged for startup;
    /// everything else is left untouched. Global setting changes are applied
    /// (keep-alive swap) or reported (dashboard listener rebuild).
    pub async fn reconcile(&self, desired: Config) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        // Desired identity set; the first occurrence of a duplicated
        // specification wins and the rest are reported as conflicts.
        let mut desired_ids = std::collections::HashSet::new();
        let mut desired_specs = Vec::with_capacity(desired.forwards.len());
        for spec in &desired.forwards {
            let id = spec.identity();
            if !desired_ids.insert(id) {
                warn!(%id, target = %spec.target, "Duplicate tunnel in configuration, ignoring");
                continue;
            }
            desired_specs.push((id, spec.clone()));
        }

        // Removals. Identities are disjoint, so order does not matter.
        for tunnel in self.registry.snapshot() {
            if !desired_ids.contains(&tunnel.id()) {
                info!(id = %tunnel.id(), target = %tunnel.spec().target, "Removing tunnel");
                tunnel.stop().await;
                self.registry.remove(&tunnel.id());
                outcome.removed += 1;
            }
        }

        // Additions, in declaration order.
        for (id, spec) in desired_specs {
            if self.registry.contains(&id) {
                continue;
            }
            let start = spec.start_on_startup;
            let tunnel = Arc::new(Tunnel::with_kubectl(spec, self.kubectl_bin.clone()));
            info!(id = %tunnel.id(), target = %tunnel.spec().target, "Adding tunnel");
            if self.registry.insert(Arc::clone(&tunnel)).is_err() {
                continue;
            }
            outcome.added += 1;
            if start {
                if let Err(e) = tunnel.start().await {
                    error!(id = %tunnel.id(), error = %e, "Failed to start tunnel");
                }
            }
        }

        // Global settings, compared against the outgoing snapshot.
        let (keep_alive_changed, listen_changed, refresh_changed) = {
            let current = self.current.read();
            (
                desired.keep_alive_interval != current.keep_alive_interval,
                desired.port != current.port,
                desired.refresh_interval != current.refresh_interval,
            )
        };
        outcome.listen_port_changed = listen_changed;
        outcome.refresh_interval_changed = refresh_changed;
        if keep_alive_changed && self.keepalive.is_running().await {
            info!(interval = ?desired.keep_alive_interval, "Keep-alive interval changed, restarting scheduler");
            self.keepalive.restart(desired.keep_alive_interval).await;
            outcome.keep_alive_changed = true;
        }

        *self.current.write() = desired;
        outcome
    }

    /// Reloads the configuration file and reconciles against it.
    ///
    /// A file that fails to load or parse leaves the previous snapshot and
    /// the live tunnel set unchanged.
    pub async fn reload_config(&self) -> ReconcileOutcome {
        match Config::load(&self.config_path, self.default_port).await {
            Ok(config) => self.reconcile(config).await,
            Err(e) => {
                error!(error = %e, "Could not reload configuration, keeping previous");
                ReconcileOutcome::default()
            }
        }
    }

    // =========================================================================
    // Scheduler & Shutdown
    // =========================================================================

    /// Starts the keep-alive scheduler at the current snapshot's cadence.
    pub async fn start_keepalive(&self) {
        let interval = self.current.read().keep_alive_interval;
        self.keepalive.start(interval).await;
    }

    /// Stops the scheduler, then every tunnel, each bounded by its own
    /// grace period.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.keepalive.stop().await;
        for tunnel in self.registry.snapshot() {
            tunnel.stop().await;
        }
    }

    // =========================================================================
    // Operator Control Surface
    // =========================================================================

    /// Starts the tunnel with the given identity.
    /// Launch failures are logged; the tunnel stays stopped until the next
    /// reconciliation or manual start.
    pub async fn start_tunnel(&self, id: &Uuid) -> Result<()> {
        let tunnel = self
            .registry
            .get(id)
            .ok_or(Error::TunnelNotFound { id: *id })?;
        if let Err(e) = tunnel.start().await {
            error!(%id, error = %e, "Failed to start tunnel");
        }
        Ok(())
    }

    /// Stops the tunnel with the given identity.
    pub async fn stop_tunnel(&self, id: &Uuid) -> Result<()> {
        let tunnel = self
            .registry
            .get(id)
            .ok_or(Error::TunnelNotFound { id: *id })?;
        tunnel.stop().await;
        Ok(())
    }

    /// Registers a tunnel outside the configuration file.
    /// An identity that is already present is rejected, not replaced.
    pub async fn add_tunnel(&self, spec: TunnelSpec) -> Result<()> {
        let start = spec.start_on_startup;
        let tunnel = Arc::new(Tunnel::with_kubectl(spec, self.kubectl_bin.clone()));
        let id = tunnel.id();
        self.registry.insert(Arc::clone(&tunnel))?;
        info!(%id, target = %tunnel.spec().target, "Added tunnel");
        if start {
            if let Err(e) = tunnel.start().await {
                error!(%id, error = %e, "Failed to start tunnel");
            }
        }
        Ok(())
    }

    /// Stops and removes the tunnel with the given identity.
    pub async fn remove_tunnel(&self, id: &Uuid) -> Result<()> {
        let tunnel = self
            .registry
            .get(id)
            .ok_or(Error::TunnelNotFound { id: *id })?;
        tunnel.stop().await;
        self.registry.remove(id);
        info!(%id, "Removed tunnel");
        Ok(())
    }

    /// Read-only views of every registered tunnel, ordered by identity.
    pub async fn list_tunnels(&self) -> Vec<TunnelView> {
        let mut views = Vec::with_capacity(self.registry.len());
        for tunnel in self.registry.snapshot() {
            views.push(tunnel.view().await);
        }
        views
    }

    /// Settings the dashboard needs from the current snapshot.
    pub fn dashboard_settings(&self) -> DashboardSettings {
        let current = self.current.read();
        DashboardSettings {
            port: current.port,
            refresh_interval: current.refresh_interval,
        }
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }
}
