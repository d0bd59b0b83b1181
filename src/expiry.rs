use crate::clock::HOUR_MS;
use crate::errors::AppResult;
use crate::models::{EpochMillis, WipeNotice, WipeReason};
use crate::store::ItemStore;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub const DEFAULT_WIPE_HOURS: u32 = 24;
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Wall-clock deadline after which the whole store is wiped. The deadline
/// lives beside the item blob so every handle on the database shares it.
#[derive(Debug, Clone, Copy)]
pub struct AutoExpiry {
    window_ms: i64,
}

impl Default for AutoExpiry {
    fn default() -> Self {
        Self::new(DEFAULT_WIPE_HOURS)
    }
}

impl AutoExpiry {
    pub fn new(hours: u32) -> Self {
        let hours = if hours == 0 { DEFAULT_WIPE_HOURS } else { hours };
        Self {
            window_ms: i64::from(hours) * HOUR_MS,
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Records a deadline one window out if none is recorded yet.
    pub fn ensure_scheduled(&self, store: &ItemStore) -> AppResult<EpochMillis> {
        if let Some(deadline) = store.storage().wipe_deadline()? {
            return Ok(deadline);
        }
        self.schedule(store)
    }

    pub fn schedule(&self, store: &ItemStore) -> AppResult<EpochMillis> {
        let deadline = store.now().saturating_add(self.window_ms);
        store.storage().set_wipe_deadline(deadline)?;
        tracing::debug!(deadline, "auto wipe scheduled");
        Ok(deadline)
    }

    /// Wipes the store once the recorded deadline has passed. The deadline is
    /// cleared, not rescheduled; the next start schedules a fresh one.
    pub fn check(&self, store: &mut ItemStore) -> AppResult<Option<WipeNotice>> {
        let Some(deadline) = store.storage().wipe_deadline()? else {
            return Ok(None);
        };
        let now = store.now();
        if now <= deadline {
            return Ok(None);
        }
        let wiped_items = store.clear()?;
        store.storage().clear_wipe_deadline()?;
        tracing::info!(wiped_items, deadline, "auto wipe fired");
        Ok(Some(WipeNotice {
            reason: WipeReason::AutoExpiry,
            wiped_items,
            at: now,
            next_deadline: None,
        }))
    }

    pub fn end_shift_wipe(&self, store: &mut ItemStore) -> AppResult<WipeNotice> {
        let wiped_items = store.clear()?;
        let next_deadline = self.schedule(store)?;
        tracing::info!(wiped_items, next_deadline, "end of shift wipe");
        Ok(WipeNotice {
            reason: WipeReason::EndOfShift,
            wiped_items,
            at: store.now(),
            next_deadline: Some(next_deadline),
        })
    }

    /// Clears every item but leaves the recorded deadline alone.
    pub fn clear_all(&self, store: &mut ItemStore) -> AppResult<WipeNotice> {
        let wiped_items = store.clear()?;
        tracing::info!(wiped_items, "all items cleared");
        Ok(WipeNotice {
            reason: WipeReason::ClearAll,
            wiped_items,
            at: store.now(),
            next_deadline: store.storage().wipe_deadline()?,
        })
    }
}

/// Periodic expiry check running on the tokio runtime.
pub struct ExpiryWatcher {
    handle: JoinHandle<()>,
}

impl ExpiryWatcher {
    pub fn spawn(
        expiry: AutoExpiry,
        store: Arc<Mutex<ItemStore>>,
        period: Duration,
        notices: mpsc::UnboundedSender<WipeNotice>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let outcome = match store.lock() {
                    Ok(mut store) => expiry.check(&mut store),
                    Err(_) => {
                        tracing::warn!("item store lock poisoned; expiry watcher stopping");
                        break;
                    }
                };
                match outcome {
                    Ok(Some(notice)) => {
                        if notices.send(notice).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => tracing::warn!(error = %error, "expiry check failed"),
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ExpiryWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
