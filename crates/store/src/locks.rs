//! Per-slot advisory write locks.

use crate::DatapackKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// A map of `(namespace, title)` slots to async mutexes.
///
/// Two concurrent requests writing the same slot (upload vs upload, delete
/// vs edit, encryption-cache regeneration) would otherwise race on
/// directory creation and renames. Acquiring the slot lock before any
/// mutation makes "at most one writer per slot" a guarantee instead of an
/// accident of low traffic.
///
/// Lock entries are created on demand and kept for the life of the
/// process; the set of live slots is bounded by the set of datapacks.
#[derive(Debug, Default)]
pub struct SlotLocks {
    locks: Mutex<HashMap<DatapackKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SlotLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the write lock for a slot, waiting if another task holds
    /// it.
    pub async fn acquire(&self, key: &DatapackKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().expect("slot lock map poisoned");
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        slot.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatapackKey;
    use geochart_layout::Namespace;
    use geochart_types::DatapackTitle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(title: &str) -> DatapackKey {
        DatapackKey::new(Namespace::Official, DatapackTitle::new(title).unwrap())
    }

    #[tokio::test]
    async fn test_same_slot_is_exclusive() {
        let locks = Arc::new(SlotLocks::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&key("Cambrian")).await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_slots_do_not_block() {
        let locks = SlotLocks::new();
        let _a = locks.acquire(&key("Cambrian")).await;
        // acquiring a different slot must not deadlock while `_a` is held
        let _b = locks.acquire(&key("Devonian")).await;
    }
}
