//! Per-signer submission serialization.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes extrinsic submissions per signer account.
///
/// The chain assigns each signed extrinsic a nonce, so two in-flight
/// submissions from one account race; holding the account's lock across
/// sign-and-watch removes the race while leaving distinct signers parallel.
#[derive(Default)]
pub struct SignerLock {
    accounts: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SignerLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive section for `account`.
    pub async fn acquire(&self, account: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut accounts = self.accounts.lock().expect("signer lock poisoned");
            accounts
                .entry(account.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_account_is_serialized() {
        let lock = Arc::new(SignerLock::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let in_section = in_section.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire("alice").await;
                let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_accounts_run_in_parallel() {
        let lock = Arc::new(SignerLock::new());
        let guard_a = lock.acquire("alice").await;
        // Bob's section must not block on Alice's.
        let guard_b = tokio::time::timeout(Duration::from_millis(50), lock.acquire("bob"))
            .await
            .expect("distinct signer blocked");
        drop(guard_a);
        drop(guard_b);
    }
}
