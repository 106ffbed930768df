//! Transaction locks with call-path-scoped reentrancy.
//!
//! Each store (trust graph, ACL, vault registry) owns one
//! [`TransactionLock`]. A [`Transaction`] is a token passed as
//! `&mut Transaction` down one logical operation; it records which locks it
//! already holds, so a nested call that asks for the same lock again just
//! continues under it instead of deadlocking.
//!
//! Locks must be taken in [`LockRank`] order: `Gestalt` → `Acl` → `Vaults`.
//! Asking for a lower-ranked lock while a higher-ranked one is held fails
//! with [`LockError::OrderViolation`]; an operation spanning several stores
//! takes them all up front, lowest rank first.
//!
//! Guards are released when the transaction is dropped.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::error::LockError;

/// Position of a lock in the global acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockRank {
    /// The trust graph.
    Gestalt,
    /// The access control list.
    Acl,
    /// The vault registry.
    Vaults,
}

/// The mutex guarding one store.
#[derive(Debug, Clone)]
pub struct TransactionLock {
    rank: LockRank,
    mutex: Arc<Mutex<()>>,
}

impl TransactionLock {
    /// A new, unheld lock at `rank`.
    #[must_use]
    pub fn new(rank: LockRank) -> Self {
        Self {
            rank,
            mutex: Arc::new(Mutex::new(())),
        }
    }

    /// This lock's position in the global order.
    #[must_use]
    pub fn rank(&self) -> LockRank {
        self.rank
    }

    /// Whether some transaction currently holds this lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.mutex.try_lock().is_err()
    }
}

struct Held {
    rank: LockRank,
    mutex: Arc<Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

/// The set of locks held by one logical operation.
#[derive(Default)]
pub struct Transaction {
    held: Vec<Held>,
}

impl Transaction {
    /// A transaction holding nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this transaction already holds `lock`.
    #[must_use]
    pub fn holds(&self, lock: &TransactionLock) -> bool {
        self.held.iter().any(|h| Arc::ptr_eq(&h.mutex, &lock.mutex))
    }

    /// Take `lock` unless this transaction already holds it.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::OrderViolation`] if a lock of the same or a
    /// higher rank is already held.
    pub async fn acquire(&mut self, lock: &TransactionLock) -> Result<(), LockError> {
        if self.holds(lock) {
            return Ok(());
        }
        if let Some(held) = self.highest_rank() {
            if held >= lock.rank {
                return Err(LockError::OrderViolation {
                    requested: lock.rank,
                    held,
                });
            }
        }
        let guard = Arc::clone(&lock.mutex).lock_owned().await;
        trace!(rank = ?lock.rank, "transaction lock acquired");
        self.held.push(Held {
            rank: lock.rank,
            mutex: Arc::clone(&lock.mutex),
            _guard: guard,
        });
        Ok(())
    }

    fn highest_rank(&self) -> Option<LockRank> {
        self.held.iter().map(|h| h.rank).max()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ranks: Vec<LockRank> = self.held.iter().map(|h| h.rank).collect();
        f.debug_struct("Transaction").field("held", &ranks).finish()
    }
}
