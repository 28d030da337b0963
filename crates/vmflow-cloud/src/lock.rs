//! Named-resource lock registry
//!
//! Serialises create/update/delete against the same logical resource within
//! one process. Different names never contend. The registry is an explicit
//! object owned by whoever constructs the reconcilers; share it through an
//! `Arc` to make several reconcilers agree on the same locks.

use crate::error::Result;
use crate::operation::OperationContext;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-wide map from resource name to a lazily created mutex
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Block until no other holder owns `name`
    pub async fn acquire(&self, name: &str) -> ResourceLockGuard {
        let guard = self.handle(name).lock_owned().await;
        tracing::debug!(lock = name, "acquired resource lock");
        ResourceLockGuard {
            name: name.to_string(),
            guard: Some(guard),
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up when the context is
    /// cancelled or its deadline passes
    pub async fn acquire_within(
        &self,
        name: &str,
        ctx: &OperationContext,
    ) -> Result<ResourceLockGuard> {
        ctx.run(&format!("waiting for lock on {name}"), self.acquire(name))
            .await
    }

    /// Number of names that have ever been locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Whether `name` is currently held
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// RAII guard for a named lock; dropping it releases the name
#[derive(Debug)]
pub struct ResourceLockGuard {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ResourceLockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock early. Calling it again is a no-op.
    pub fn release(&mut self) {
        if self.guard.take().is_some() {
            tracing::debug!(lock = %self.name, "released resource lock");
        }
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for ResourceLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let locks = ResourceLocks::new();
        let mut guard = locks.acquire("virtualMachines/a").await;
        assert!(locks.is_locked("virtualMachines/a"));

        guard.release();
        guard.release();
        assert!(!guard.is_held());
        assert!(!locks.is_locked("virtualMachines/a"));

        drop(guard);
        let _again = locks.acquire("virtualMachines/a").await;
    }

    #[tokio::test]
    async fn test_different_names_do_not_contend() {
        let locks = ResourceLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_same_name_blocks_until_dropped() {
        let locks = Arc::new(ResourceLocks::new());
        let first = locks.acquire("vm").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("vm").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_honours_deadline() {
        let locks = ResourceLocks::new();
        let _held = locks.acquire("vm").await;

        let ctx = OperationContext::with_timeout(Duration::from_secs(5));
        let err = locks.acquire_within("vm", &ctx).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
