//! Portward Core Library
//!
//! Tunnel lifecycle and reconciliation engine for `kubectl port-forward`
//! supervision. Provides functionality to:
//! - Model forwarding rules with content-derived identities
//! - Supervise one child process per tunnel (start, stop, output drain)
//! - Probe tunnel health periodically and replace failed processes
//! - Reconcile the live tunnel set against a declarative YAML configuration
//!
//! # Architecture
//! - `tunnel`: the entity, its process supervision, and identity model
//! - `registry`: the single lock-guarded owner of the live tunnel set
//! - `keepalive`: the periodic health-check scheduler
//! - `manager`: reconciliation and the operator control surface
//! - `config`: immutable configuration snapshots loaded from YAML
//!
//! The tunnel transport itself is delegated to the external `kubectl`
//! binary; nothing is persisted across restarts.

pub mod config;
pub mod error;
pub mod keepalive;
pub mod manager;
pub mod registry;
pub mod tunnel;

// Re-export the primary API surface
pub use config::{Config, DEFAULT_LISTEN_PORT};
pub use error::{Error, Result};
pub use keepalive::KeepAlive;
pub use manager::{DashboardSettings, ReconcileOutcome, TunnelManager};
pub use registry::TunnelRegistry;
pub use tunnel::{
    DatabaseDescriptor, DatabaseKind, DatabaseSpec, Tunnel, TunnelKind, TunnelSpec, TunnelView,
};
