//! Tunnel specification, identity, and database descriptor models.

use std::time::Duration;

use sha2::{Digest, Sha256};
use uuid::Uuid;

// ============================================================================
// Tunnel Specification
// ============================================================================

/// A desired forwarding rule: one entry of the declarative configuration.
///
/// The spec carries no runtime state; two specs with the same defining
/// attributes denote the same tunnel entity (see [`TunnelSpec::identity`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Logical grouping label.
    pub group: String,
    /// kubectl context naming the target cluster.
    pub context: String,
    /// Resource to forward to (e.g. "svc/gateway" or "pod/db-0").
    pub target: String,
    /// Kubernetes namespace of the target.
    pub namespace: String,
    /// Local bind port.
    pub local_port: u16,
    /// Remote port; may be a named port, hence not strictly numeric.
    pub destination_port: String,
    /// Start the tunnel when the configuration is applied.
    pub start_on_startup: bool,
    /// Optional protocol tag.
    pub kind: Option<TunnelKind>,
    /// Database descriptor, meaningful only with `kind = Database`.
    pub database: Option<DatabaseSpec>,
}

impl TunnelSpec {
    /// Computes the content-derived identity of this spec.
    ///
    /// SHA-256 over the defining tuple (group, context, target, namespace,
    /// local port, destination port), rendered as a UUID. Fields are
    /// newline-delimited before hashing so adjacent fields cannot alias.
    /// Mutable runtime state never participates.
    pub fn identity(&self) -> Uuid {
        let mut hasher = Sha256::new();
        for field in [
            self.group.as_str(),
            self.context.as_str(),
            self.target.as_str(),
            self.namespace.as_str(),
        ] {
            hasher.update(field.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(self.local_port.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.destination_port.as_bytes());

        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::new_v8(bytes)
    }
}

/// Protocol tag for a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    Http,
    Database,
}

impl TunnelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Database => "database",
        }
    }

    /// Parses a kind tag, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "database" => Some(Self::Database),
            _ => None,
        }
    }
}

// ============================================================================
// Database Descriptors
// ============================================================================

/// Database connection metadata attached to a `Database`-kind tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSpec {
    pub kind: DatabaseKind,
    /// Database name on the remote server.
    pub name: String,
    /// Username used in generated connection material.
    pub username: String,
}

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgresql,
    Mysql,
}

/// Constant per-engine metadata used when generating datasource definitions.
#[derive(Debug)]
pub struct DatabaseDescriptor {
    pub port: u16,
    pub jdbc_prefix: &'static str,
    pub product: &'static str,
    pub jdbc_version: &'static str,
    pub driver_name: &'static str,
    pub driver_version: &'static str,
    pub driver_class: &'static str,
    pub driver_ref: &'static str,
    pub dbms: &'static str,
    pub exact_driver_version: &'static str,
    pub identifier_quote: &'static str,
}

const POSTGRESQL_DESCRIPTOR: DatabaseDescriptor = DatabaseDescriptor {
    port: 5432,
    jdbc_prefix: "postgresql",
    product: "PostgreSQL",
    jdbc_version: "4.2",
    driver_name: "PostgreSQL JDBC Driver",
    driver_version: "42.6.0",
    driver_class: "org.postgresql.Driver",
    driver_ref: "postgresql",
    dbms: "POSTGRES",
    exact_driver_version: "42.6",
    identifier_quote: "\\\"",
};

const MYSQL_DESCRIPTOR: DatabaseDescriptor = DatabaseDescriptor {
    port: 3306,
    jdbc_prefix: "mysql",
    product: "MySQL",
    jdbc_version: "4.2",
    driver_name: "MySQL Connector/J",
    driver_version: "mysql-connector-j-8.2.0 (Revision: 06a1f724497fd81c6a659131fda822c9e5085b6c)",
    driver_class: "com.mysql.cj.jdbc.Driver",
    driver_ref: "mysql.8",
    dbms: "MYSQL",
    exact_driver_version: "8.2",
    identifier_quote: "`",
};

impl DatabaseKind {
    /// Looks up the constant descriptor table for this engine.
    pub const fn descriptor(&self) -> &'static DatabaseDescriptor {
        match self {
            Self::Postgresql => &POSTGRESQL_DESCRIPTOR,
            Self::Mysql => &MYSQL_DESCRIPTOR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
        }
    }

    /// Parses an engine name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "postgresql" => Some(Self::Postgresql),
            "mysql" => Some(Self::Mysql),
            _ => None,
        }
    }
}

// ============================================================================
// Read Views
// ============================================================================

/// Read-only projection of a tunnel for the control surface and dashboard.
#[derive(Debug, Clone)]
pub struct TunnelView {
    pub id: Uuid,
    pub group: String,
    pub context: String,
    pub target: String,
    pub namespace: String,
    pub local_port: u16,
    pub destination_port: String,
    pub start_on_startup: bool,
    pub kind: Option<TunnelKind>,
    pub database: Option<DatabaseSpec>,
    /// Whether a forwarding process is attached and alive.
    pub is_running: bool,
    /// Time since the last successful health probe; `None` if never probed.
    pub last_checked_ago: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TunnelSpec {
        TunnelSpec {
            group: "default".to_string(),
            context: "staging".to_string(),
            target: "svc/gateway".to_string(),
            namespace: "default".to_string(),
            local_port: 8080,
            destination_port: "80".to_string(),
            start_on_startup: true,
            kind: None,
            database: None,
        }
    }

    #[test]
    fn test_identity_deterministic() {
        let a = spec();
        let b = spec();
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity(), a.identity());
    }

    #[test]
    fn test_identity_ignores_runtime_flags() {
        let a = spec();
        let mut b = spec();
        b.start_on_startup = false;
        b.kind = Some(TunnelKind::Http);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_sensitive_to_each_field() {
        let base = spec();
        let mut changed: Vec<TunnelSpec> = Vec::new();

        let mut s = spec();
        s.group = "infra".to_string();
        changed.push(s);

        let mut s = spec();
        s.context = "production".to_string();
        changed.push(s);

        let mut s = spec();
        s.target = "svc/api".to_string();
        changed.push(s);

        let mut s = spec();
        s.namespace = "kube-system".to_string();
        changed.push(s);

        let mut s = spec();
        s.local_port = 8081;
        changed.push(s);

        let mut s = spec();
        s.destination_port = "8080".to_string();
        changed.push(s);

        for other in &changed {
            assert_ne!(base.identity(), other.identity());
        }
        // And all of them differ from each other.
        for (i, a) in changed.iter().enumerate() {
            for b in &changed[i + 1..] {
                assert_ne!(a.identity(), b.identity());
            }
        }
    }

    #[test]
    fn test_identity_field_boundaries() {
        // Content shifted across a field boundary must not alias.
        let mut a = spec();
        a.context = "stag".to_string();
        a.target = "ing-svc/gateway".to_string();
        let mut b = spec();
        b.context = "staging".to_string();
        b.target = "-svc/gateway".to_string();
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(TunnelKind::parse("HTTP"), Some(TunnelKind::Http));
        assert_eq!(TunnelKind::parse("database"), Some(TunnelKind::Database));
        assert_eq!(TunnelKind::parse("ftp"), None);
    }

    #[test]
    fn test_database_descriptors() {
        let pg = DatabaseKind::Postgresql.descriptor();
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.jdbc_prefix, "postgresql");

        let my = DatabaseKind::Mysql.descriptor();
        assert_eq!(my.port, 3306);
        assert_eq!(my.driver_class, "com.mysql.cj.jdbc.Driver");

        assert_eq!(DatabaseKind::parse("PostgreSQL"), Some(DatabaseKind::Postgresql));
        assert_eq!(DatabaseKind::parse("oracle"), None);
    }
}
