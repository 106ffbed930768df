//! Node identity and root key bootstrap.
//!
//! On first start the node generates its id and a 256-bit root key and
//! writes them to `<state_dir>/node_id` and `<state_dir>/root.key` (hex).
//! Later starts read them back. The key file is restricted to the owner.

use std::path::Path;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

use vaultmesh_core::{EncryptionKey, NodeId};

const NODE_ID_FILE: &str = "node_id";
const ROOT_KEY_FILE: &str = "root.key";

/// Persistent identity of this node.
pub struct NodeIdentity {
    pub node_id: NodeId,
    pub root_key: EncryptionKey,
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

/// Load the node identity from `state_dir`, creating whatever is missing.
///
/// # Errors
///
/// Returns an error if the directory or files cannot be created or read,
/// or if an existing file does not parse.
pub fn load_or_create(state_dir: &Path) -> Result<NodeIdentity> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create {}", state_dir.display()))?;

    let id_path = state_dir.join(NODE_ID_FILE);
    let node_id = if id_path.exists() {
        let raw = std::fs::read_to_string(&id_path)
            .with_context(|| format!("failed to read {}", id_path.display()))?;
        raw.trim()
            .parse()
            .with_context(|| format!("failed to parse {}", id_path.display()))?
    } else {
        let node_id = NodeId::generate();
        std::fs::write(&id_path, node_id.as_str())
            .with_context(|| format!("failed to write {}", id_path.display()))?;
        tracing::info!(node_id = %node_id, "generated node id");
        node_id
    };

    let key_path = state_dir.join(ROOT_KEY_FILE);
    let root_key = if key_path.exists() {
        let raw = Zeroizing::new(
            std::fs::read_to_string(&key_path)
                .with_context(|| format!("failed to read {}", key_path.display()))?,
        );
        EncryptionKey::from_hex(raw.trim())
            .with_context(|| format!("failed to parse {}", key_path.display()))?
    } else {
        let key = EncryptionKey::generate();
        std::fs::write(&key_path, key.to_hex().as_bytes())
            .with_context(|| format!("failed to write {}", key_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&key_path, perms)
                .with_context(|| format!("failed to set permissions on {}", key_path.display()))?;
        }

        tracing::info!(path = %key_path.display(), "generated root key");
        key
    };

    Ok(NodeIdentity { node_id, root_key })
}
