//! In-memory [`EventsSource`] used by tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use pool::types::{PoolEvent, PoolEventKind};

use super::{normalize_pool, EventsError, EventsSource, PriceObservation};

#[derive(Default)]
pub struct MemoryEventsSource {
    inner: Mutex<HashMap<String, Vec<PoolEvent>>>,
    /// When non-zero, the next N queries fail as `Unavailable`.
    fail_next: AtomicU32,
}

impl MemoryEventsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_event(&self, pool: &str, event: PoolEvent) {
        let mut guard = self.inner.lock().await;
        let stream = guard.entry(normalize_pool(pool)).or_default();
        stream.push(event);
        stream.sort_by_key(|e| e.ordering_key());
    }

    /// Make the next `n` queries fail, to exercise retry paths.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), EventsError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(EventsError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventsSource for MemoryEventsSource {
    async fn events_in(
        &self,
        pool: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>, EventsError> {
        self.check_available()?;
        let guard = self.inner.lock().await;
        Ok(guard
            .get(&normalize_pool(pool))
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn price_at_or_before(
        &self,
        pool: &str,
        block: u64,
    ) -> Result<Option<PriceObservation>, EventsError> {
        self.check_available()?;
        let guard = self.inner.lock().await;
        Ok(guard.get(&normalize_pool(pool)).and_then(|stream| {
            stream
                .iter()
                .rev()
                .filter(|e| e.block_number <= block)
                .find_map(|e| match e.kind {
                    PoolEventKind::Swap { sqrt_price_x96, .. } => Some(PriceObservation {
                        block_number: e.block_number,
                        sqrt_price_x96,
                    }),
                    _ => None,
                })
        }))
    }

    async fn latest_block(&self, pool: &str) -> Result<Option<u64>, EventsError> {
        self.check_available()?;
        let guard = self.inner.lock().await;
        Ok(guard
            .get(&normalize_pool(pool))
            .and_then(|stream| stream.last().map(|e| e.block_number)))
    }
}
