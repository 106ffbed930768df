//! Node configuration for `VaultMesh`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `VAULTMESH_*` environment variables.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use vaultmesh_core::NodeId;

const DEFAULT_PORT: u16 = 7420;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Directory holding the database, vault directories, node id and root key.
    pub state_dir: PathBuf,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Base URLs of known peers, keyed by node id.
    pub peers: BTreeMap<NodeId, String>,
    /// Timeout for each HTTP call to a peer.
    pub remote_timeout: Duration,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `RocksDB` persistent storage.
    RocksDb { path: PathBuf },
}

impl NodeConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on (binds to `0.0.0.0`)
    /// - `VAULTMESH_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:7420`)
    /// - `VAULTMESH_STORAGE`: `memory` or `rocksdb` (default: `memory`)
    /// - `VAULTMESH_STATE_DIR`: node state directory (default: `./state`)
    /// - `VAULTMESH_LOG_LEVEL`: log filter (default: `info`)
    /// - `VAULTMESH_PEERS`: `nodeid=http://host:port` pairs, comma separated
    /// - `VAULTMESH_REMOTE_TIMEOUT`: seconds per peer request (default: `30`)
    ///
    /// Malformed peer entries are skipped.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Priority: VAULTMESH_BIND_ADDR > PORT > default 127.0.0.1:7420
        let bind_addr = if let Some(addr) = lookup("VAULTMESH_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
        } else if let Some(port_str) = lookup("PORT") {
            let port: u16 = port_str.parse().unwrap_or(DEFAULT_PORT);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
        };

        let state_dir = PathBuf::from(
            lookup("VAULTMESH_STATE_DIR").unwrap_or_else(|| "./state".to_owned()),
        );

        let storage_backend = match lookup("VAULTMESH_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "rocksdb" => StorageBackendType::RocksDb {
                path: state_dir.join("db"),
            },
            _ => StorageBackendType::Memory,
        };

        let log_level = lookup("VAULTMESH_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let peers = lookup("VAULTMESH_PEERS")
            .map(|raw| parse_peers(&raw))
            .unwrap_or_default();

        let remote_timeout = Duration::from_secs(
            lookup("VAULTMESH_REMOTE_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
        );

        Self {
            bind_addr,
            storage_backend,
            state_dir,
            log_level,
            peers,
            remote_timeout,
        }
    }

    /// Parent directory of every vault directory.
    #[must_use]
    pub fn vaults_dir(&self) -> PathBuf {
        self.state_dir.join("vaults")
    }
}

/// Parse `nodeid=url,nodeid=url`. Entries without `=`, with an invalid node
/// id or with an empty URL are dropped. Trailing slashes are trimmed.
fn parse_peers(raw: &str) -> BTreeMap<NodeId, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (id, url) = entry.trim().split_once('=')?;
            let id: NodeId = id.trim().parse().ok()?;
            let url = url.trim().trim_end_matches('/');
            (!url.is_empty()).then(|| (id, url.to_owned()))
        })
        .collect()
}
