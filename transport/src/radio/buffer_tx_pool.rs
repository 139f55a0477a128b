//! Pool of [`TxBuffer`]s shared by many PHY filler threads and drained by one
//! TX thread. Grounded on the original's `buffer_tx_pool_t`.

use std::sync::Arc;
use std::time::Duration;

use super::buffer_tx::{TxBuffer, TxPoolNotify};
use super::sample::TxOrderId;

pub struct TxBufferPool {
    pub id: u32,
    pub nof_antennas: usize,
    pub nof_buffer_tx: usize,
    pub ant_streams_length_samples: usize,

    buffers: Vec<TxBuffer>,
    notify: Arc<TxPoolNotify>,
}

impl TxBufferPool {
    #[must_use]
    pub fn new(id: u32, nof_antennas: usize, nof_buffer_tx: usize, ant_streams_length_samples: usize) -> Self {
        let notify = Arc::new(TxPoolNotify::default());
        let buffers = (0..nof_buffer_tx)
            .map(|i| TxBuffer::new(i as u32, nof_antennas, ant_streams_length_samples, Arc::clone(&notify)))
            .collect();
        Self {
            id,
            nof_antennas,
            nof_buffer_tx,
            ant_streams_length_samples,
            buffers,
            notify,
        }
    }

    #[must_use]
    pub fn buffer(&self, index: usize) -> &TxBuffer {
        &self.buffers[index]
    }

    /// Scans in order, returning the first buffer whose outer lock it could
    /// grab. Returns `None` when the pool is full — callers should treat
    /// this as fatal by design (see [`crate::error::EnqueuePolicy`]).
    #[must_use]
    pub fn get_buffer_tx_to_fill(&self) -> Option<(usize, &TxBuffer)> {
        self.buffers
            .iter()
            .enumerate()
            .find(|(_, b)| b.try_lock_outer())
    }

    fn get_specific_tx_order_id_if_available(&self, tx_order_id_target: TxOrderId) -> Option<usize> {
        self.buffers.iter().position(|b| {
            b.is_inner_locked() && b.meta().tx_order_id == tx_order_id_target
        })
    }

    /// Blocking-with-timeout search for a READY buffer with `tx_order_id ==
    /// tx_order_id_target`, backed by a pool-wide condition variable notified
    /// from `set_transmittable`.
    #[must_use]
    pub fn wait_for_specific_tx_order_id_to(
        &self,
        tx_order_id_target: TxOrderId,
        timeout: Duration,
    ) -> Option<usize> {
        if let Some(idx) = self.get_specific_tx_order_id_if_available(tx_order_id_target) {
            return Some(idx);
        }

        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return self.get_specific_tx_order_id_if_available(tx_order_id_target);
            }
            let guard = self.notify.cnt.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let (_guard, timed_out) = self
                .notify
                .cv
                .wait_timeout(guard, remaining.min(Duration::from_millis(100)))
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            drop(timed_out);
            if let Some(idx) = self.get_specific_tx_order_id_if_available(tx_order_id_target) {
                return Some(idx);
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
        }
    }

    /// Same search, busywaiting instead of sleeping — used by the TX thread
    /// while stitching consecutive bursts, where it must not sleep.
    #[must_use]
    pub fn wait_for_specific_tx_order_id_busy_to(
        &self,
        tx_order_id_target: TxOrderId,
        timeout_us: u32,
    ) -> Option<usize> {
        use crate::common::watch::{Resolution, Watch};

        let watch = Watch::new();
        loop {
            if let Some(idx) = self.get_specific_tx_order_id_if_available(tx_order_id_target) {
                return Some(idx);
            }
            if watch.is_elapsed(i64::from(timeout_us), Resolution::Micros) {
                return self.get_specific_tx_order_id_if_available(tx_order_id_target);
            }
            Watch::busywait(5, Resolution::Micros);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::buffer_tx::TxBufferMeta;

    #[test]
    fn acquire_returns_none_when_pool_exhausted() {
        let pool = TxBufferPool::new(0, 1, 2, 256);
        assert!(pool.get_buffer_tx_to_fill().is_some());
        assert!(pool.get_buffer_tx_to_fill().is_some());
        assert!(pool.get_buffer_tx_to_fill().is_none());
    }

    #[test]
    fn find_ready_locates_committed_buffer() {
        let pool = TxBufferPool::new(0, 1, 2, 256);
        let (idx, buf) = pool.get_buffer_tx_to_fill().unwrap();
        buf.set_transmittable(TxBufferMeta {
            tx_order_id: 3,
            tx_time: 10,
            ..Default::default()
        });
        assert_eq!(pool.get_specific_tx_order_id_if_available(3), Some(idx));
        assert_eq!(pool.get_specific_tx_order_id_if_available(4), None);
    }

    #[test]
    fn wait_for_specific_tx_order_id_busy_to_times_out() {
        let pool = TxBufferPool::new(0, 1, 1, 256);
        assert_eq!(pool.wait_for_specific_tx_order_id_busy_to(0, 100), None);
    }

    #[test]
    fn wait_for_specific_tx_order_id_to_finds_buffer_committed_from_another_thread() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let pool = StdArc::new(TxBufferPool::new(0, 1, 2, 256));
        let pool2 = StdArc::clone(&pool);
        let handle = thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let (_idx, buf) = pool2.get_buffer_tx_to_fill().unwrap();
            buf.set_transmittable(TxBufferMeta {
                tx_order_id: 5,
                tx_time: 0,
                ..Default::default()
            });
        });
        let found = pool.wait_for_specific_tx_order_id_to(5, Duration::from_secs(1));
        assert!(found.is_some());
        handle.join().unwrap();
    }
}
