//! A single vault's on-disk content.
//!
//! Layout under `<vaults_dir>/<vault_id>/`:
//!
//! - `meta.json`: creation time, plaintext.
//! - `secrets/<hex(name)>`: one AES-256-GCM blob per secret, encrypted
//!   with the vault's own key.
//!
//! The handle is started with the vault key and stopped by dropping it.
//! Secret operations on a stopped handle fail with
//! [`VaultError::VaultStopped`].

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::crypto::{self, EncryptionKey};
use crate::error::VaultError;
use crate::ids::VaultId;

const META_FILE: &str = "meta.json";
const SECRETS_DIR: &str = "secrets";
const MAX_NAME_LEN: usize = 255;
/// Secret names are hex-encoded into file names, which cap at 255 bytes.
const MAX_SECRET_NAME_LEN: usize = 120;

/// Check a vault name.
///
/// # Errors
///
/// Returns [`VaultError::InvalidName`] if the name is empty, longer than
/// 255 bytes, or contains `/` or NUL.
pub fn validate_name(name: &str) -> Result<(), VaultError> {
    check_name(name, MAX_NAME_LEN)
}

fn validate_secret_name(name: &str) -> Result<(), VaultError> {
    check_name(name, MAX_SECRET_NAME_LEN)
}

fn check_name(name: &str, max: usize) -> Result<(), VaultError> {
    let too_long;
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.len() > max {
        too_long = format!("must be at most {max} bytes");
        too_long.as_str()
    } else if name.contains('/') {
        "must not contain '/'"
    } else if name.contains('\0') {
        "must not contain NUL"
    } else {
        return Ok(());
    };
    Err(VaultError::InvalidName {
        reason: format!("'{}': {reason}", name.escape_debug()),
    })
}

/// Point-in-time facts about a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStats {
    pub id: VaultId,
    pub name: String,
    pub secret_count: usize,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Full plaintext content of a vault, as moved between nodes by clone and
/// pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub vault_id: VaultId,
    pub name: String,
    /// Secret name to hex-encoded value.
    pub secrets: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VaultMeta {
    created_at: DateTime<Utc>,
}

struct State {
    name: String,
    key: Option<EncryptionKey>,
}

/// Handle to one vault directory.
pub struct Vault {
    id: VaultId,
    dir: PathBuf,
    state: RwLock<State>,
}

impl Vault {
    /// Lay out a fresh vault directory and return a started handle.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the directory cannot be written.
    pub async fn create(
        dir: PathBuf,
        id: VaultId,
        name: String,
        key: EncryptionKey,
    ) -> Result<Self, VaultError> {
        let secrets = dir.join(SECRETS_DIR);
        fs::create_dir_all(&secrets)
            .await
            .map_err(|e| VaultError::io(&secrets, &e))?;
        let meta = VaultMeta {
            created_at: Utc::now(),
        };
        let meta_path = dir.join(META_FILE);
        let bytes = serde_json::to_vec(&meta).map_err(|e| VaultError::Io {
            path: meta_path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(&meta_path, bytes)
            .await
            .map_err(|e| VaultError::io(&meta_path, &e))?;
        debug!(vault_id = %id, dir = %dir.display(), "vault directory created");
        Ok(Self {
            id,
            dir,
            state: RwLock::new(State {
                name,
                key: Some(key),
            }),
        })
    }

    /// A stopped handle over an existing directory. Touches nothing on
    /// disk.
    #[must_use]
    pub fn open(dir: PathBuf, id: VaultId, name: String) -> Self {
        Self {
            id,
            dir,
            state: RwLock::new(State { name, key: None }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &VaultId {
        &self.id
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn name(&self) -> String {
        self.state.read().await.name.clone()
    }

    pub async fn rename(&self, name: String) {
        self.state.write().await.name = name;
    }

    /// Load the vault key.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the vault directory is missing.
    pub async fn start(&self, key: EncryptionKey) -> Result<(), VaultError> {
        let secrets = self.dir.join(SECRETS_DIR);
        fs::metadata(&secrets)
            .await
            .map_err(|e| VaultError::io(&secrets, &e))?;
        self.state.write().await.key = Some(key);
        debug!(vault_id = %self.id, "vault started");
        Ok(())
    }

    /// Drop the vault key. Idempotent.
    pub async fn stop(&self) {
        if self.state.write().await.key.take().is_some() {
            debug!(vault_id = %self.id, "vault stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.key.is_some()
    }

    async fn key(&self) -> Result<EncryptionKey, VaultError> {
        self.state
            .read()
            .await
            .key
            .clone()
            .ok_or_else(|| VaultError::VaultStopped {
                vault_id: self.id.clone(),
            })
    }

    fn secret_path(&self, name: &str) -> PathBuf {
        self.dir.join(SECRETS_DIR).join(hex::encode(name))
    }

    /// Create or overwrite a secret.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidName`] for a bad secret name.
    /// - [`VaultError::VaultStopped`] if the handle is stopped.
    /// - [`VaultError::Crypto`] or [`VaultError::Io`].
    pub async fn write_secret(&self, name: &str, value: &[u8]) -> Result<(), VaultError> {
        validate_secret_name(name)?;
        let key = self.key().await?;
        let sealed = crypto::encrypt(&key, value)?;
        let path = self.secret_path(name);
        fs::write(&path, sealed)
            .await
            .map_err(|e| VaultError::io(&path, &e))?;
        Ok(())
    }

    /// Read and decrypt a secret.
    ///
    /// # Errors
    ///
    /// - [`VaultError::SecretNotFound`] if it does not exist.
    /// - [`VaultError::VaultStopped`] if the handle is stopped.
    /// - [`VaultError::Crypto`] or [`VaultError::Io`].
    pub async fn read_secret(&self, name: &str) -> Result<Vec<u8>, VaultError> {
        validate_secret_name(name)?;
        let key = self.key().await?;
        let path = self.secret_path(name);
        let sealed = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VaultError::SecretNotFound {
                    vault_id: self.id.clone(),
                    name: name.to_owned(),
                });
            }
            Err(e) => return Err(VaultError::io(&path, &e)),
        };
        Ok(crypto::decrypt(&key, &sealed)?)
    }

    /// Remove a secret.
    ///
    /// # Errors
    ///
    /// - [`VaultError::SecretNotFound`] if it does not exist.
    /// - [`VaultError::VaultStopped`] if the handle is stopped.
    /// - [`VaultError::Io`].
    pub async fn delete_secret(&self, name: &str) -> Result<(), VaultError> {
        validate_secret_name(name)?;
        self.key().await?;
        let path = self.secret_path(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(VaultError::SecretNotFound {
                vault_id: self.id.clone(),
                name: name.to_owned(),
            }),
            Err(e) => Err(VaultError::io(&path, &e)),
        }
    }

    /// Secret names, sorted.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultStopped`] if the handle is stopped.
    /// - [`VaultError::Io`].
    pub async fn list_secrets(&self) -> Result<Vec<String>, VaultError> {
        self.key().await?;
        Ok(self
            .secret_files()
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// `(name, size)` of every secret file, sorted by name. Files whose
    /// names do not decode are skipped.
    async fn secret_files(&self) -> Result<Vec<(String, u64)>, VaultError> {
        let dir = self.dir.join(SECRETS_DIR);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| VaultError::io(&dir, &e))?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| VaultError::io(&dir, &e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|s| hex::decode(s).ok())
                .and_then(|raw| String::from_utf8(raw).ok())
            else {
                continue;
            };
            let size = entry
                .metadata()
                .await
                .map_err(|e| VaultError::io(&entry.path(), &e))?
                .len();
            out.push((name, size));
        }
        out.sort();
        Ok(out)
    }

    /// Name, secret count, on-disk size and creation time.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the directory or metadata is unreadable.
    pub async fn stats(&self) -> Result<VaultStats, VaultError> {
        let meta_path = self.dir.join(META_FILE);
        let raw = fs::read(&meta_path)
            .await
            .map_err(|e| VaultError::io(&meta_path, &e))?;
        let meta: VaultMeta = serde_json::from_slice(&raw).map_err(|e| VaultError::Io {
            path: meta_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let files = self.secret_files().await?;
        Ok(VaultStats {
            id: self.id.clone(),
            name: self.name().await,
            secret_count: files.len(),
            size_bytes: files.iter().map(|(_, size)| size).sum(),
            created_at: meta.created_at,
        })
    }

    /// Decrypt every secret into a transferable snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`read_secret`](Self::read_secret).
    pub async fn snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        let mut secrets = BTreeMap::new();
        for name in self.list_secrets().await? {
            let value = self.read_secret(&name).await?;
            secrets.insert(name, hex::encode(value));
        }
        Ok(VaultSnapshot {
            vault_id: self.id.clone(),
            name: self.name().await,
            secrets,
        })
    }

    /// Make the vault's secrets match `snapshot` exactly. The vault's own
    /// name is left alone.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidName`] for a bad secret name or
    ///   [`VaultError::Io`] for a value that is not hex.
    /// - Anything [`write_secret`](Self::write_secret) returns.
    pub async fn restore(&self, snapshot: &VaultSnapshot) -> Result<(), VaultError> {
        let mut decoded = Vec::with_capacity(snapshot.secrets.len());
        for (name, value) in &snapshot.secrets {
            validate_secret_name(name)?;
            let bytes = hex::decode(value).map_err(|e| VaultError::Io {
                path: self.secret_path(name).display().to_string(),
                reason: format!("snapshot value is not hex: {e}"),
            })?;
            decoded.push((name, bytes));
        }
        for existing in self.list_secrets().await? {
            if !snapshot.secrets.contains_key(&existing) {
                self.delete_secret(&existing).await?;
            }
        }
        for (name, bytes) in decoded {
            self.write_secret(name, &bytes).await?;
        }
        debug!(vault_id = %self.id, secrets = snapshot.secrets.len(), "vault restored");
        Ok(())
    }

    /// Stop the handle and delete the vault directory. Returns `false` if
    /// anything is left behind.
    pub async fn remove(&self) -> bool {
        self.stop().await;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!(vault_id = %self.id, dir = %self.dir.display(), error = %e, "vault directory removal incomplete");
                false
            }
        }
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}
