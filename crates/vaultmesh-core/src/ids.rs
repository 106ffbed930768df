//! Identifiers used across the node.
//!
//! All ids are opaque, comparable strings so they can serve directly as
//! storage key segments and JSON map keys:
//!
//! - [`NodeId`]: a peer's identity (base-58).
//! - [`VaultId`]: base-58 of 32 random bytes; globally unique.
//! - [`PermissionId`]: a UUID v4 naming one shared permission record.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// Number of random bytes behind a generated [`VaultId`] or [`NodeId`].
const RANDOM_ID_BYTES: usize = 32;

fn random_base58() -> String {
    let mut bytes = [0u8; RANDOM_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bs58::encode(bytes).into_string()
}

fn check_base58(kind: &'static str, value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Invalid {
            kind,
            value: value.to_owned(),
            reason: "must not be empty".to_owned(),
        });
    }
    bs58::decode(value)
        .into_vec()
        .map(|_| ())
        .map_err(|e| IdError::Invalid {
            kind,
            value: value.to_owned(),
            reason: e.to_string(),
        })
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $check:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Borrow the encoded id.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let check: fn(&'static str, &str) -> Result<(), IdError> = $check;
                check($kind, s)?;
                Ok(Self(s.to_owned()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id!(
    /// Identity of a node in the network.
    NodeId,
    "node id",
    check_base58
);

string_id!(
    /// Identity of a vault; unique across every node.
    VaultId,
    "vault id",
    check_base58
);

string_id!(
    /// Key of one shared permission record in the ACL.
    PermissionId,
    "permission id",
    |kind, value| {
        uuid::Uuid::parse_str(value)
            .map(|_| ())
            .map_err(|e| IdError::Invalid {
                kind,
                value: value.to_owned(),
                reason: e.to_string(),
            })
    }
);

impl NodeId {
    /// A fresh random node id.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_base58())
    }
}

impl VaultId {
    /// A fresh random vault id. Uniqueness against existing vaults is the
    /// caller's job; see [`generate_unique`].
    #[must_use]
    pub fn generate() -> Self {
        Self(random_base58())
    }
}

impl PermissionId {
    /// A fresh random permission id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Outcome of [`generate_unique`] when every candidate collided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    /// How many candidates were tried.
    pub attempts: usize,
}

/// Generate ids with `generate` until `taken` reports one as free.
///
/// `taken` may suspend (it usually consults the store). Gives up after
/// `max_attempts` collisions.
///
/// # Errors
///
/// Returns the error from `taken` as-is, or `Ok(Err(Exhausted))` when the
/// retry budget runs out.
pub async fn generate_unique<T, G, F, Fut, E>(
    max_attempts: usize,
    mut generate: G,
    mut taken: F,
) -> Result<Result<T, Exhausted>, E>
where
    G: FnMut() -> T,
    F: FnMut(&T) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    for _ in 0..max_attempts {
        let candidate = generate();
        if !taken(&candidate).await? {
            return Ok(Ok(candidate));
        }
    }
    Ok(Err(Exhausted {
        attempts: max_attempts,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generated_vault_ids_decode_to_32_bytes() {
        let id = VaultId::generate();
        assert_eq!(bs58::decode(id.as_str()).into_vec().unwrap().len(), 32);
        assert_ne!(id, VaultId::generate());
    }

    #[test]
    fn parse_rejects_non_base58() {
        assert!("".parse::<NodeId>().is_err());
        assert!("has/slash".parse::<VaultId>().is_err());
        assert!("0OIl".parse::<NodeId>().is_err());
    }

    #[test]
    fn permission_id_is_uuid() {
        let id = PermissionId::generate();
        assert!(id.as_str().parse::<PermissionId>().is_ok());
        assert!("not-a-uuid".parse::<PermissionId>().is_err());
    }

    #[test]
    fn serde_uses_plain_strings() {
        let id = NodeId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<NodeId>("\"bad/id\"").is_err());
    }

    #[tokio::test]
    async fn generate_unique_retries_on_collision() {
        let mut n = 0u32;
        let result: Result<Result<u32, Exhausted>, ()> = generate_unique(
            5,
            || {
                n += 1;
                n
            },
            |c| {
                let taken = *c < 3;
                async move { Ok(taken) }
            },
        )
        .await;
        assert_eq!(result.unwrap(), Ok(3));
    }

    #[tokio::test]
    async fn generate_unique_gives_up() {
        let result: Result<Result<u8, Exhausted>, ()> =
            generate_unique(50, || 0u8, |_| async { Ok(true) }).await;
        assert_eq!(result.unwrap(), Err(Exhausted { attempts: 50 }));
    }
}
