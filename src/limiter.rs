//! Adapter-side backpressure for queue operations.
//!
//! Two bounds apply to every `enqueue` / `enqueue_and_await`:
//!
//! 1. at most `max_concurrency` operations hold a slot at once;
//! 2. at most `max_jobs_per_tick` slot holders are released into the
//!    queue per `tick_interval`.
//!
//! Callers over either bound wait; they are never rejected. The limiter
//! does not throttle the backend's own consumption.

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug)]
struct TickWindow {
    started: Instant,
    released: usize,
}

/// Concurrency and dispatch-rate limiter. Clones share state.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    slots: Arc<Semaphore>,
    window: Arc<Mutex<TickWindow>>,
    max_concurrency: usize,
    max_jobs_per_tick: usize,
    tick_interval: Duration,
}

/// Held while a queue operation is in flight; dropping it frees the slot.
#[derive(Debug)]
pub struct LimiterPermit {
    _slot: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrency: usize, max_jobs_per_tick: usize, tick_interval: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        ConcurrencyLimiter {
            slots: Arc::new(Semaphore::new(max_concurrency)),
            window: Arc::new(Mutex::new(TickWindow {
                started: Instant::now(),
                released: 0,
            })),
            max_concurrency,
            max_jobs_per_tick: max_jobs_per_tick.max(1),
            tick_interval,
        }
    }

    /// Wait for a slot, then for dispatch room in the current tick.
    ///
    /// Unbounded on its own; callers wrap it in their operation timeout.
    ///
    /// # Errors
    ///
    /// `Error::AdapterClosed` once [`close`](Self::close) has been called.
    pub async fn acquire(&self) -> Result<LimiterPermit> {
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::AdapterClosed)?;

        self.admit().await?;
        Ok(LimiterPermit { _slot: slot })
    }

    async fn admit(&self) -> Result<()> {
        loop {
            if self.slots.is_closed() {
                return Err(Error::AdapterClosed);
            }

            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                if now >= window.started + self.tick_interval {
                    window.started = now;
                    window.released = 0;
                }
                if window.released < self.max_jobs_per_tick {
                    window.released += 1;
                    return Ok(());
                }
                (window.started + self.tick_interval).saturating_duration_since(now)
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Operations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.slots.available_permits()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Stop admitting operations. Waiters and later callers get
    /// `Error::AdapterClosed`; permits already held stay valid.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }
}
