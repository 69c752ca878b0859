//! Per-wallet submission lock
//!
//! At most one transaction may be in flight per wallet. The guard is owned so
//! it can be held across the whole protected, retried submission and is
//! released when the submitting future completes or is dropped.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct WalletLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, wallet: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(wallet.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Whether a submission currently holds the wallet
    pub fn is_locked(&self, wallet: &str) -> bool {
        match self.locks.get(wallet) {
            Some(lock) => {
                let held = lock.try_lock().is_err();
                held
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_wallet_is_exclusive() {
        let locks = WalletLocks::new();
        let guard = locks.acquire("eth:main").await;
        assert!(locks.is_locked("eth:main"));

        let second = tokio::time::timeout(Duration::from_millis(20), locks.acquire("eth:main")).await;
        assert!(second.is_err());

        drop(guard);
        assert!(!locks.is_locked("eth:main"));
        let _again = locks.acquire("eth:main").await;
    }

    #[tokio::test]
    async fn test_distinct_wallets_do_not_contend() {
        let locks = WalletLocks::new();
        let _a = locks.acquire("eth:main").await;
        let b = tokio::time::timeout(Duration::from_millis(20), locks.acquire("bsc:main")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_aborted_waiter_leaves_holder_intact() {
        let locks = WalletLocks::new();
        let guard = locks.acquire("sol:main").await;
        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move {
                let _g = locks.acquire("sol:main").await;
            }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        waiter.abort();
        assert!(locks.is_locked("sol:main"));
        drop(guard);
        assert!(!locks.is_locked("sol:main"));
    }
}
