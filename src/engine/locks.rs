//! Exclusive sections keyed by (cash desk, currency).

use crate::domain::{Asset, CashDeskId};
use crate::error::LedgerError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

type LockKey = (CashDeskId, Asset);

/// Registry of per-(desk, currency) async mutexes.
///
/// Mutexes are created on first use and kept for the life of the process;
/// the key space is bounded by desks × (configured fiat currencies + USDT),
/// the only assets requests are allowed to name.
pub struct DeskLocks {
    inner: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
    timeout: Duration,
}

/// Held sections; released on drop.
#[derive(Debug)]
pub struct DeskGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl DeskLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn slot(&self, key: &LockKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Acquire every (desk, currency) section in sorted order.
    ///
    /// Each acquisition waits at most the configured timeout; sections already
    /// taken are released if a later one times out.
    pub async fn acquire(
        &self,
        desk: &CashDeskId,
        currencies: &[Asset],
    ) -> Result<DeskGuard, LedgerError> {
        let mut keys: Vec<LockKey> = currencies
            .iter()
            .map(|c| (desk.clone(), c.clone()))
            .collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let slot = self.slot(key);
            match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    tracing::warn!(
                        cash_desk_id = %key.0,
                        currency = %key.1,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "lock acquisition timed out"
                    );
                    return Err(LedgerError::ConcurrentModification(format!(
                        "{} {} is busy, try again",
                        key.0, key.1
                    )));
                }
            }
        }

        Ok(DeskGuard { _guards: guards })
    }
}
