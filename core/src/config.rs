//! Declarative tunnel configuration loaded from YAML.
//!
//! A new immutable snapshot is produced wholesale on every (re)load; the
//! reconciler never mutates a snapshot in place. Document-level types stay
//! private here so serde defaulting never leaks into the domain model.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::tunnel::{DatabaseKind, DatabaseSpec, TunnelKind, TunnelSpec};

/// Default dashboard listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 3000;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Logical group labels, in declaration order.
    pub groups: Vec<String>,
    /// Tunnel specifications, in declaration order.
    pub forwards: Vec<TunnelSpec>,
    /// Health-check cadence.
    pub keep_alive_interval: Duration,
    /// Dashboard auto-refresh cadence.
    pub refresh_interval: Duration,
    /// Dashboard listen port.
    pub port: u16,
}

impl Config {
    /// An empty snapshot with default cadences, used before the first load.
    pub fn empty(port: u16) -> Self {
        Self {
            groups: Vec::new(),
            forwards: Vec::new(),
            keep_alive_interval: DEFAULT_INTERVAL,
            refresh_interval: DEFAULT_INTERVAL,
            port,
        }
    }

    /// Loads and parses a configuration file.
    ///
    /// `default_port` applies when the document carries no `port` key.
    pub async fn load(path: &Path, default_port: u16) -> Result<Self> {
        info!(path = %path.display(), "Loading configuration");
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text, default_port)
    }

    /// Parses a configuration document. An empty document yields the
    /// empty snapshot.
    pub fn parse(text: &str, default_port: u16) -> Result<Self> {
        match serde_yaml::from_str::<Option<ConfigDoc>>(text)? {
            Some(doc) => doc.into_config(default_port),
            None => Ok(Self::empty(default_port)),
        }
    }
}

fn default_group() -> String {
    "default".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDoc {
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    port_forwards: Vec<ForwardDoc>,
    #[serde(default)]
    keep_alive_interval: Option<DurationValue>,
    #[serde(default)]
    refresh_interval: Option<DurationValue>,
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForwardDoc {
    #[serde(default = "default_group")]
    group: String,
    context: String,
    target: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    local_port: u16,
    remote_port: PortValue,
    #[serde(default)]
    start_on_startup: bool,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    database: Option<DatabaseDoc>,
}

#[derive(Debug, Deserialize)]
struct DatabaseDoc {
    kind: String,
    name: String,
    username: String,
}

/// A port that may be numeric or a named service port.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Name(String),
}

impl PortValue {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Name(s) => s,
        }
    }
}

/// An interval given as integer seconds or a humantime string ("90s", "2m").
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    fn into_duration(self) -> Result<Duration> {
        match self {
            Self::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Self::Text(text) => humantime::parse_duration(&text)
                .map_err(|e| Error::Config(format!("Invalid interval '{text}': {e}"))),
        }
    }
}

impl ConfigDoc {
    fn into_config(self, default_port: u16) -> Result<Config> {
        let mut forwards = Vec::with_capacity(self.port_forwards.len());
        for doc in self.port_forwards {
            forwards.push(doc.into_spec()?);
        }
        Ok(Config {
            groups: self.groups,
            forwards,
            keep_alive_interval: match self.keep_alive_interval {
                Some(v) => v.into_duration()?,
                None => DEFAULT_INTERVAL,
            },
            refresh_interval: match self.refresh_interval {
                Some(v) => v.into_duration()?,
                None => DEFAULT_INTERVAL,
            },
            port: self.port.unwrap_or(default_port),
        })
    }
}

impl ForwardDoc {
    fn into_spec(self) -> Result<TunnelSpec> {
        let kind = match self.kind {
            Some(tag) => Some(
                TunnelKind::parse(&tag)
                    .ok_or_else(|| Error::Config(format!("Unknown tunnel type '{tag}'")))?,
            ),
            None => None,
        };
        let database = match self.database {
            Some(db) => Some(DatabaseSpec {
                kind: DatabaseKind::parse(&db.kind).ok_or_else(|| {
                    Error::Config(format!("Unknown database kind '{}'", db.kind))
                })?,
                name: db.name,
                username: db.username,
            }),
            None => None,
        };
        Ok(TunnelSpec {
            group: self.group,
            context: self.context,
            target: self.target,
            namespace: self.namespace,
            local_port: self.local_port,
            destination_port: self.remote_port.into_string(),
            start_on_startup: self.start_on_startup,
            kind,
            database,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
groups:
  - default
  - infra
keepAliveInterval: 30
refreshInterval: 2m
port: 8088
portForwards:
  - context: staging
    target: svc/gateway
    localPort: 8080
    remotePort: 80
    startOnStartup: true
    type: http
  - group: infra
    context: production
    target: pod/db-0
    namespace: data
    localPort: 15432
    remotePort: postgres
    type: database
    database:
      kind: postgresql
      name: orders
      username: app
"#;

    #[test]
    fn test_parse_full_document() {
        let config = Config::parse(FULL, DEFAULT_LISTEN_PORT).unwrap();

        assert_eq!(config.groups, vec!["default", "infra"]);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(config.refresh_interval, Duration::from_secs(120));
        assert_eq!(config.port, 8088);
        assert_eq!(config.forwards.len(), 2);

        let web = &config.forwards[0];
        assert_eq!(web.group, "default");
        assert_eq!(web.namespace, "default");
        assert_eq!(web.destination_port, "80");
        assert!(web.start_on_startup);
        assert_eq!(web.kind, Some(TunnelKind::Http));

        let db = &config.forwards[1];
        assert_eq!(db.group, "infra");
        assert_eq!(db.namespace, "data");
        assert_eq!(db.destination_port, "postgres");
        assert!(!db.start_on_startup);
        let database = db.database.as_ref().unwrap();
        assert_eq!(database.kind, DatabaseKind::Postgresql);
        assert_eq!(database.name, "orders");
    }

    #[test]
    fn test_parse_defaults() {
        let config = Config::parse("portForwards: []", 3001).unwrap();
        assert_eq!(config.keep_alive_interval, Duration::from_secs(60));
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.port, 3001);
        assert!(config.groups.is_empty());
        assert!(config.forwards.is_empty());
    }

    #[test]
    fn test_parse_empty_document() {
        let config = Config::parse("", DEFAULT_LISTEN_PORT).unwrap();
        assert!(config.forwards.is_empty());
        assert_eq!(config.port, DEFAULT_LISTEN_PORT);
    }

    #[test]
    fn test_parse_rejects_malformed_yaml() {
        assert!(Config::parse("portForwards: [unclosed", DEFAULT_LISTEN_PORT).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let text = r#"
portForwards:
  - context: staging
    target: svc/gateway
    localPort: 8080
    remotePort: 80
    type: ftp
"#;
        let err = Config::parse(text, DEFAULT_LISTEN_PORT).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_rejects_bad_interval() {
        let err = Config::parse("keepAliveInterval: soon", DEFAULT_LISTEN_PORT).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forwards.yaml");
        tokio::fs::write(&path, FULL).await.unwrap();

        let config = Config::load(&path, DEFAULT_LISTEN_PORT).await.unwrap();
        assert_eq!(config.forwards.len(), 2);

        assert!(Config::load(&dir.path().join("missing.yaml"), DEFAULT_LISTEN_PORT)
            .await
            .is_err());
    }
}
