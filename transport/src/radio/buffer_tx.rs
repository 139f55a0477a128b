//! `TxBuffer`'s two-stage lock state machine.
//!
//! ```text
//! IDLE --try_lock_outer--> FILLING --set_transmittable--> READY
//!   ^                                                        |
//!   +-------------------- set_transmitted_or_abort ----------+
//! ```
//!
//! Outer lock separates IDLE from {FILLING, READY}; inner lock separates
//! FILLING from READY. Grounded on the original's `buffer_tx_t`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use smallvec::SmallVec;
use strum_macros::Display;

use super::sample::{Sample, SampleTime, TxOrderId};

/// Where a [`TxBuffer`] sits in its two-stage lock state machine, derived
/// from the outer/inner lock flags. Exists for diagnostics (logging,
/// `Debug`-free external tooling) — the lock flags themselves remain the
/// source of truth the state machine transitions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TxBufferState {
    Idle,
    Filling,
    Ready,
}

/// Per-antenna power adjustment, one entry per antenna (≤ 8).
pub type PerAntennaDelta = SmallVec<[f32; 8]>;

/// Commit-time metadata for a `TxBuffer` transitioning FILLING -> READY.
#[derive(Debug, Clone)]
pub struct TxBufferMeta {
    pub tx_order_id: TxOrderId,
    pub tx_time: SampleTime,
    /// Override for sequence progression; `-1` means "default +1".
    pub tx_order_id_expect_next: TxOrderId,
    /// Hint: how long the TX thread should spin for the next buffer before
    /// closing the current burst.
    pub busy_wait_us: u32,
    pub tx_power_adj_db: Option<PerAntennaDelta>,
    pub rx_power_adj_db: Option<PerAntennaDelta>,
}

impl Default for TxBufferMeta {
    /// `tx_order_id_expect_next` defaults to the "default +1" sentinel, not
    /// `0` — a caller that sets `tx_order_id` and leaves the rest via
    /// `..Default::default()` must get sequential progression, not a
    /// self-match on `tx_order_id_expect_next == 0`.
    fn default() -> Self {
        Self {
            tx_order_id: -1,
            tx_time: -1,
            tx_order_id_expect_next: -1,
            busy_wait_us: 0,
            tx_power_adj_db: None,
            rx_power_adj_db: None,
        }
    }
}

impl TxBufferMeta {
    fn idle() -> Self {
        Self::default()
    }
}

/// Shared notification state so the TX thread can block on "a new packet
/// became transmittable" instead of polling the whole pool.
#[derive(Default)]
pub struct TxPoolNotify {
    pub(crate) cnt: Mutex<u32>,
    pub(crate) cv: Condvar,
}

pub struct TxBuffer {
    pub id: u32,
    pub nof_antennas: usize,
    pub ant_streams_length_samples: usize,

    ant_streams: Vec<UnsafeCell<Vec<Sample>>>,
    outer_locked: AtomicBool,
    inner_locked: AtomicBool,
    tx_length_samples: AtomicU32,
    tx_length_samples_cnt: AtomicU32,
    meta: UnsafeCell<TxBufferMeta>,
    notify: Arc<TxPoolNotify>,
}

unsafe impl Sync for TxBuffer {}

impl TxBuffer {
    #[must_use]
    pub fn new(
        id: u32,
        nof_antennas: usize,
        ant_streams_length_samples: usize,
        notify: Arc<TxPoolNotify>,
    ) -> Self {
        let ant_streams = (0..nof_antennas)
            .map(|_| UnsafeCell::new(vec![Sample::ZERO; ant_streams_length_samples]))
            .collect();
        Self {
            id,
            nof_antennas,
            ant_streams_length_samples,
            ant_streams,
            outer_locked: AtomicBool::new(false),
            inner_locked: AtomicBool::new(false),
            tx_length_samples: AtomicU32::new(0),
            tx_length_samples_cnt: AtomicU32::new(0),
            meta: UnsafeCell::new(TxBufferMeta::idle()),
            notify,
        }
    }

    #[must_use]
    pub fn is_outer_locked(&self) -> bool {
        self.outer_locked.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_inner_locked(&self) -> bool {
        self.inner_locked.load(Ordering::Acquire)
    }

    /// Current position in the IDLE -> FILLING -> READY state machine,
    /// derived from the outer/inner lock flags.
    #[must_use]
    pub fn state(&self) -> TxBufferState {
        match (self.is_outer_locked(), self.is_inner_locked()) {
            (false, _) => TxBufferState::Idle,
            (true, false) => TxBufferState::Filling,
            (true, true) => TxBufferState::Ready,
        }
    }

    /// IDLE -> FILLING. Never blocks; returns `false` if already locked.
    #[must_use]
    pub fn try_lock_outer(&self) -> bool {
        self.outer_locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Current committed metadata. Meaningful only while inner-locked (READY).
    #[must_use]
    pub fn meta(&self) -> TxBufferMeta {
        unsafe { (*self.meta.get()).clone() }
    }

    #[must_use]
    pub fn tx_length_samples(&self) -> u32 {
        self.tx_length_samples.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn tx_length_samples_cnt(&self) -> u32 {
        self.tx_length_samples_cnt.load(Ordering::Acquire)
    }

    /// Writable antenna streams for the current filler. Only valid while
    /// FILLING (outer locked, inner unlocked).
    ///
    /// # Panics
    ///
    /// Panics if not outer-locked-inner-unlocked, or if `tx_length_samples`
    /// exceeds the buffer's capacity.
    pub fn get_ant_streams(&self, tx_length_samples: u32) -> Vec<&mut [Sample]> {
        assert!(
            self.is_outer_locked() && !self.is_inner_locked(),
            "incorrect lock state"
        );
        assert!(
            tx_length_samples as usize <= self.ant_streams_length_samples,
            "TX length longer than TX buffer"
        );
        self.tx_length_samples.store(tx_length_samples, Ordering::Release);
        self.ant_streams
            .iter()
            .map(|cell| unsafe { &mut (*cell.get())[..] })
            .collect()
    }

    /// How many samples are safe to send so far, announced by the filler
    /// while writing is still in progress.
    ///
    /// # Panics
    ///
    /// Panics if `cnt` exceeds the buffer's capacity.
    pub fn set_tx_length_samples_cnt(&self, cnt: u32) {
        assert!(
            cnt as usize <= self.ant_streams_length_samples,
            "TX length counter longer than TX buffer"
        );
        self.tx_length_samples_cnt.store(cnt, Ordering::Release);
    }

    /// FILLING -> READY. The commit point.
    ///
    /// # Panics
    ///
    /// Panics if not outer-locked-inner-unlocked.
    pub fn set_transmittable(&self, meta: TxBufferMeta) {
        assert!(
            self.is_outer_locked() && !self.is_inner_locked(),
            "incorrect lock state"
        );
        tracing::trace!(
            id = self.id,
            tx_order_id = meta.tx_order_id,
            from_state = %self.state(),
            "tx buffer committing to transmittable"
        );
        unsafe {
            *self.meta.get() = meta;
        }
        self.inner_locked.store(true, Ordering::Release);

        {
            let mut cnt = self.notify.cnt.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *cnt += 1;
        }
        self.notify.cv.notify_all();
    }

    /// Blocks until at least `target` samples are safe to send. Time-
    /// critical: busywaits rather than sleeping.
    pub fn wait_for_samples_busy_nto(&self, target: u32) {
        assert!(
            target <= self.tx_length_samples(),
            "announced fewer samples than waiting for"
        );
        while self.tx_length_samples_cnt() < target {
            crate::common::watch::Watch::busywait(5, crate::common::watch::Resolution::Micros);
        }
    }

    /// Read-only antenna streams starting at `offset`. Valid only while
    /// READY (outer and inner both locked) — the TX thread's view.
    ///
    /// # Panics
    ///
    /// Panics if not outer-locked-inner-locked.
    pub fn get_ant_streams_offset(&self, offset: usize) -> Vec<&[Sample]> {
        assert!(
            self.is_outer_locked() && self.is_inner_locked(),
            "incorrect lock state"
        );
        self.ant_streams
            .iter()
            .map(|cell| unsafe { &(*cell.get())[offset..] })
            .collect()
    }

    /// Zero-fills `[offset, offset+length)` on every antenna. Valid only
    /// while READY.
    ///
    /// # Panics
    ///
    /// Panics if not outer-locked-inner-locked, or the range exceeds the
    /// buffer's capacity.
    pub fn set_zero(&self, offset: usize, length: usize) {
        assert!(
            self.is_outer_locked() && self.is_inner_locked(),
            "incorrect lock state"
        );
        assert!(
            offset + length <= self.ant_streams_length_samples,
            "zeroing beyond length of TX buffer"
        );
        for cell in &self.ant_streams {
            let storage = unsafe { &mut *cell.get() };
            storage[offset..offset + length].fill(Sample::ZERO);
        }
    }

    fn reset(&self) {
        assert!(
            self.is_outer_locked() && self.is_inner_locked(),
            "incorrect lock state"
        );
        self.tx_length_samples.store(0, Ordering::Release);
        self.tx_length_samples_cnt.store(0, Ordering::Release);
        unsafe {
            *self.meta.get() = TxBufferMeta::idle();
        }
    }

    /// READY -> IDLE: the TX thread is done with this buffer.
    ///
    /// # Panics
    ///
    /// Panics if not outer-locked-inner-locked.
    pub fn set_transmitted_or_abort(&self) {
        self.reset();
        self.inner_locked.store(false, Ordering::Release);
        self.outer_locked.store(false, Ordering::Release);

        let mut cnt = self.notify.cnt.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *cnt = cnt.saturating_sub(1);
    }
}
