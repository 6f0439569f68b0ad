// Copyright 2026 Covenant Labs

//! Exclusive resource tokens: side-effecting tasks
//! declared non-commutative serialize on a named resource rather than the
//! whole graph, so only the conflicting subset is affected.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily creates one [`tokio::sync::Mutex`] per resource name and hands
/// out owned guards so a worker can hold the lock across an `.await`.
#[derive(Default)]
pub struct ResourceTokens {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ResourceTokens {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, resource: &str) -> Arc<Mutex<()>> {
        self.locks.entry(resource.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquire the exclusive token for `resource`, suspending until it is
    /// free. Dropping the returned guard releases it.
    pub async fn acquire(&self, resource: &str) -> OwnedMutexGuard<()> {
        self.lock_for(resource).lock_owned().await
    }
}
