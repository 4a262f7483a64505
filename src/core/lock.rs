//! Per-policy apply serialisation
//!
//! Two applies to the same policy must not interleave: each computes its plan
//! from the state it fetched, and interleaved writes would invalidate both.
//! [`PolicyLocks`] hands out one async mutex per policy name; applies to
//! different policies proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Registry of keyed async mutexes
#[derive(Debug, Default, Clone)]
pub struct PolicyLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Held while a policy is being reconciled; releases on drop
#[derive(Debug)]
pub struct PolicyGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl PolicyGuard {
    pub fn policy_name(&self) -> &str {
        &self.name
    }
}

impl PolicyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder has `name` locked.
    pub async fn lock(&self, name: &str) -> PolicyGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on can go
            map.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(map.entry(name.to_string()).or_default())
        };

        debug!("Waiting for lock on policy '{name}'");
        let guard = mutex.lock_owned().await;
        debug!("Acquired lock on policy '{name}'");

        PolicyGuard {
            name: name.to_string(),
            _guard: guard,
        }
    }

    /// Number of policy names currently tracked
    pub fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_name_serialises() {
        let locks = PolicyLocks::new();
        let first = locks.lock("fe").await;

        let waiting = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock("fe").await.policy_name().to_string() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(first);
        assert_eq!(waiting.await.unwrap(), "fe");
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locks = PolicyLocks::new();
        let _fe = locks.lock("fe").await;
        let be = tokio::time::timeout(Duration::from_millis(100), locks.lock("be")).await;
        assert!(be.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = PolicyLocks::new();
        drop(locks.lock("fe").await);
        drop(locks.lock("be").await);
        // "fe" was released before "be" was requested
        assert_eq!(locks.tracked(), 1);
    }
}
