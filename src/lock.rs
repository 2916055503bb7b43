//! Opt-in advisory locks for cooperating writers.
//!
//! Locks are session-level PostgreSQL advisory locks keyed by a hash of the
//! lock name. They only exclude processes that use the same name.

use crate::error::{Error, Result};
use crate::remote::RemoteSql;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Advisory lock key for `name`: the first 8 bytes of its SHA-256, as a
/// non-negative `bigint`.
pub fn lock_key(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

fn as_bool(value: Option<&JsonValue>) -> bool {
    match value {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::String(s)) => matches!(s.as_str(), "t" | "true"),
        _ => false,
    }
}

/// A held advisory lock. Release it explicitly with [`AdvisoryLock::release`].
pub struct AdvisoryLock {
    remote: Arc<dyn RemoteSql>,
    name: String,
    key: i64,
}

impl std::fmt::Debug for AdvisoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisoryLock")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl AdvisoryLock {
    /// Try to take the lock named `name`. `None` when another session holds it.
    pub async fn try_acquire(remote: Arc<dyn RemoteSql>, name: &str) -> Result<Option<Self>> {
        let key = lock_key(name);
        let result = remote
            .execute_statement(&format!("SELECT pg_try_advisory_lock({}) AS locked", key))
            .await?;
        if !as_bool(result.first("locked")) {
            debug!("Lock '{}' is busy", name);
            return Ok(None);
        }
        debug!("Lock '{}' acquired", name);
        Ok(Some(Self {
            remote,
            name: name.to_string(),
            key,
        }))
    }

    /// Lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock.
    pub async fn release(self) -> Result<()> {
        let result = self
            .remote
            .execute_statement(&format!("SELECT pg_advisory_unlock({}) AS unlocked", self.key))
            .await?;
        if !as_bool(result.first("unlocked")) {
            warn!("Lock '{}' was not held at release", self.name);
        }
        Ok(())
    }
}

/// Run `op` while holding the lock named `name`.
///
/// Fails with [`Error::LockHeld`] when the lock is taken. The lock is released
/// whether `op` succeeds or not.
pub async fn with_lock<T, F, Fut>(remote: Arc<dyn RemoteSql>, name: &str, op: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let lock = AdvisoryLock::try_acquire(remote, name)
        .await?
        .ok_or_else(|| Error::LockHeld {
            name: name.to_string(),
        })?;

    let result = op().await;
    match lock.release().await {
        Ok(()) => result,
        Err(e) if result.is_ok() => Err(e),
        Err(e) => {
            warn!("Failed to release lock '{}': {}", name, e);
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable_and_positive() {
        assert_eq!(lock_key("uploads"), lock_key("uploads"));
        assert_ne!(lock_key("uploads"), lock_key("downloads"));
        for name in ["", "a", "table:public.cities", "ñ"] {
            assert!(lock_key(name) >= 0);
        }
    }

    #[test]
    fn test_as_bool() {
        assert!(as_bool(Some(&JsonValue::Bool(true))));
        assert!(as_bool(Some(&JsonValue::String("t".into()))));
        assert!(!as_bool(Some(&JsonValue::String("f".into()))));
        assert!(!as_bool(None));
    }
}
