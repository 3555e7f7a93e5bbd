use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::GridId;

/// One async mutex per grid identity.
///
/// Holding the guard returned by [`GridLocks::acquire`] means no other
/// balancing run for the same grid is in flight. Runs for different grids do
/// not contend. Entries nobody holds or waits on are dropped on the next
/// acquire.
#[derive(Debug, Default)]
pub struct GridLocks {
    inner: Mutex<HashMap<GridId, Arc<AsyncMutex<()>>>>,
}

impl GridLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: GridId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock();
            map.retain(|key, lock| *key == id || Arc::strong_count(lock) > 1);
            map.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of grids that currently have a lock entry
    pub fn tracked(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_grid_is_serialized() {
        let locks = Arc::new(GridLocks::new());
        let id = GridId::new();

        let guard = locks.acquire(id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("second acquire should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_grids_do_not_block() {
        let locks = GridLocks::new();
        let _a = locks.acquire(GridId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(GridId::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = GridLocks::new();
        for _ in 0..5 {
            let _g = locks.acquire(GridId::new()).await;
        }
        let _held = locks.acquire(GridId::new()).await;
        assert_eq!(locks.tracked(), 1);
    }
}
