// src/guardian.rs
//! Named locks serializing work per key (a session id).
//!
//! Entries are reference counted and dropped from the table as soon as the
//! last holder or waiter leaves. Re-entrant use of the same key from inside
//! a guarded future deadlocks until the timeout fires.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::ChargingError;

/// Process wide instance used by the session manager.
pub static GUARDIAN: Lazy<Guardian> = Lazy::new(Guardian::new);

#[derive(Default)]
pub struct Guardian {
    locks: Mutex<HashMap<String, (Arc<AsyncMutex<()>>, usize)>>,
}

struct EntryRef<'a> {
    guardian: &'a Guardian,
    key: String,
}

impl Drop for EntryRef<'_> {
    fn drop(&mut self) {
        let mut locks = self.guardian.table();
        if let Some((_, refs)) = locks.get_mut(&self.key) {
            *refs -= 1;
            if *refs == 0 {
                locks.remove(&self.key);
            }
        }
    }
}

impl Guardian {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Arc<AsyncMutex<()>>, usize)>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, key: &str) -> (Arc<AsyncMutex<()>>, EntryRef<'_>) {
        let mut locks = self.table();
        let entry = locks
            .entry(key.to_string())
            .or_insert_with(|| (Arc::new(AsyncMutex::new(())), 0));
        entry.1 += 1;
        (
            entry.0.clone(),
            EntryRef {
                guardian: self,
                key: key.to_string(),
            },
        )
    }

    /// Runs `work` while holding the lock for `key`.
    ///
    /// Fails with `TimedOut` when the lock cannot be taken within `timeout`;
    /// a zero timeout waits forever.
    pub async fn guard<F, T>(&self, key: &str, timeout: Duration, work: F) -> Result<T, ChargingError>
    where
        F: Future<Output = T>,
    {
        let (lock, _entry) = self.enter(key);
        let _held = if timeout.is_zero() {
            lock.lock_owned().await
        } else {
            match tokio::time::timeout(timeout, lock.lock_owned()).await {
                Ok(held) => held,
                Err(_) => {
                    warn!("⚠️ Guardian timed out waiting for {}", key);
                    return Err(ChargingError::TimedOut);
                }
            }
        };
        debug!("Guardian acquired {}", key);
        Ok(work.await)
    }

    /// Number of live keys, for diagnostics.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_guard_runs_and_releases() {
        let g = Guardian::new();
        let out = g.guard("s1", Duration::from_secs(1), async { 42 }).await.unwrap();
        assert_eq!(out, 42);
        assert!(g.is_empty());
    }

    #[tokio::test]
    async fn test_guard_serializes_same_key() {
        let g = Arc::new(Guardian::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let g = g.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                g.guard("same", Duration::from_secs(5), async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(g.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_times_out() {
        let g = Arc::new(Guardian::new());
        let holder = g.clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let h = tokio::spawn(async move {
            holder
                .guard("busy", Duration::from_secs(1), async {
                    let _ = rx.await;
                })
                .await
        });
        tokio::task::yield_now().await;
        let err = g
            .guard("busy", Duration::from_millis(100), async {})
            .await
            .unwrap_err();
        assert_eq!(err, ChargingError::TimedOut);
        tx.send(()).unwrap();
        h.await.unwrap().unwrap();
        assert!(g.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let g = Guardian::new();
        let r = g
            .guard("a", Duration::from_millis(50), async {
                g.guard("b", Duration::from_millis(50), async { 1 }).await
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r, 1);
    }
}
