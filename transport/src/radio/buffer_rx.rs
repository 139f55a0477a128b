//! Per-antenna lock-free ring buffer fed by a single radio thread.
//!
//! Grounded on the original's `buffer_rx_t::get_ant_streams_next`, adapted to
//! the contract where the caller has already written samples into the slot
//! returned by [`RxRingBuffer::write_index`] before calling [`RxRingBuffer::advance`].
//! `advance` performs only the book-keeping: jitter check, wrap-copy,
//! counter update, prestream gating, publish, notify.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};

use crossbeam_utils::CachePadded;

use super::sample::{Sample, SampleTime};

/// Default acceptable jitter, in samples, between the internal counter and
/// an observed hardware timestamp before a drop is assumed.
pub const DEFAULT_ACCEPTABLE_JITTER_RANGE: i64 = 1;

pub struct RxRingBuffer {
    nof_antennas: usize,
    ant_streams_length_samples: usize,
    nof_new_samples_max: usize,
    samp_rate: u32,

    /// Each antenna's backing storage, sized `length + nof_new_samples_max`
    /// so a write at any logical index never overruns the allocation.
    /// Single-writer (the RX thread), many-reader; writer access is through
    /// `&self` because the buffer is shared via `Arc`.
    ant_streams: Vec<UnsafeCell<Vec<Sample>>>,

    acceptable_jitter_range: i64,
    internal_sample_count: AtomicI64,
    rx_prestream: AtomicI64,
    notification_period_samples: i64,
    notification_next: AtomicI64,

    /// Cache-line padded: written once per [`Self::advance`] call by the RX
    /// thread and polled by every reader calling [`Self::wait_until`], so it
    /// sits on its own line rather than fighting the write-only counters
    /// above it for ownership of one.
    rx_time_passed: CachePadded<AtomicI64>,
    notify_mutex: Mutex<()>,
    notify_cv: Condvar,
}

unsafe impl Sync for RxRingBuffer {}

impl RxRingBuffer {
    /// # Panics
    ///
    /// Panics if `ant_streams_length_samples < 8 * nof_new_samples_max`, the
    /// slack the producer needs to stay ahead of readers.
    #[must_use]
    pub fn new(
        nof_antennas: usize,
        ant_streams_length_samples: usize,
        samp_rate: u32,
        nof_new_samples_max: usize,
        rx_prestream_ms: u32,
        rx_notification_period_us: u32,
    ) -> Self {
        assert!(
            nof_new_samples_max * 8 <= ant_streams_length_samples,
            "buffer should be at least 8 times larger than the max chunk size"
        );

        let backing_len = ant_streams_length_samples + nof_new_samples_max;
        let ant_streams = (0..nof_antennas)
            .map(|_| UnsafeCell::new(vec![Sample::ZERO; backing_len]))
            .collect();

        let rx_prestream = i64::from(samp_rate) * i64::from(rx_prestream_ms) / 1000;
        let notification_period_samples =
            i64::from(samp_rate) * i64::from(rx_notification_period_us) / 1_000_000;

        Self {
            nof_antennas,
            ant_streams_length_samples,
            nof_new_samples_max,
            samp_rate,
            ant_streams,
            acceptable_jitter_range: DEFAULT_ACCEPTABLE_JITTER_RANGE,
            internal_sample_count: AtomicI64::new(0),
            rx_prestream: AtomicI64::new(rx_prestream),
            notification_period_samples,
            notification_next: AtomicI64::new(0),
            rx_time_passed: CachePadded::new(AtomicI64::new(0)),
            notify_mutex: Mutex::new(()),
            notify_cv: Condvar::new(),
        }
    }

    #[must_use]
    pub fn nof_antennas(&self) -> usize {
        self.nof_antennas
    }

    #[must_use]
    pub fn ant_streams_length_samples(&self) -> usize {
        self.ant_streams_length_samples
    }

    #[must_use]
    pub fn samp_rate(&self) -> u32 {
        self.samp_rate
    }

    /// Logical index the producer should write the next chunk of samples at.
    #[must_use]
    pub fn write_index(&self) -> usize {
        let count = self.internal_sample_count.load(Ordering::Relaxed);
        (count.rem_euclid(self.ant_streams_length_samples as i64)) as usize
    }

    /// Writable slice for `antenna`, starting at [`Self::write_index`] and
    /// covering up to `nof_new_samples_max` samples. Only the single RX
    /// thread may call this.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other thread calls this, or
    /// [`Self::advance`], concurrently — the buffer has exactly one writer.
    #[must_use]
    pub unsafe fn write_slice(&self, antenna: usize, nof_new_samples: usize) -> &mut [Sample] {
        let idx = self.write_index();
        let storage = unsafe { &mut *self.ant_streams[antenna].get() };
        &mut storage[idx..idx + nof_new_samples]
    }

    /// Immutable view of the full backing storage for `antenna`, for readers.
    #[must_use]
    pub fn ant_stream(&self, antenna: usize) -> &[Sample] {
        unsafe { &*self.ant_streams[antenna].get() }
    }

    #[must_use]
    pub fn get_rx_time_passed(&self) -> SampleTime {
        self.rx_time_passed.load(Ordering::Acquire)
    }

    /// Book-keeping after the caller has written `nof_new_samples` samples
    /// (obtained via [`Self::write_slice`]) observed at hardware timestamp
    /// `first_sample_time`.
    ///
    /// # Panics
    ///
    /// Panics if `nof_new_samples` exceeds `nof_new_samples_max`.
    pub fn advance(&self, first_sample_time: SampleTime, nof_new_samples: usize) {
        assert!(
            nof_new_samples <= self.nof_new_samples_max,
            "nof_new_samples {nof_new_samples} exceeds max {}",
            self.nof_new_samples_max
        );

        let count = self.internal_sample_count.load(Ordering::Relaxed);
        let time_error = count - first_sample_time;
        let mut count = if time_error < -self.acceptable_jitter_range
            || self.acceptable_jitter_range < time_error
        {
            tracing::warn!(
                expected = count,
                observed = first_sample_time,
                "rx jitter out of window, snapping internal sample counter"
            );
            first_sample_time
        } else {
            count
        };

        let length = self.ant_streams_length_samples as i64;
        let index = count.rem_euclid(length) as usize;

        if index + nof_new_samples > self.ant_streams_length_samples {
            let overhang = index + nof_new_samples - self.ant_streams_length_samples;
            for antenna in &self.ant_streams {
                let storage = unsafe { &mut *antenna.get() };
                let (head, tail) = storage.split_at_mut(self.ant_streams_length_samples);
                head[..overhang].copy_from_slice(&tail[..overhang]);
            }
        }

        count += nof_new_samples as i64;
        self.internal_sample_count.store(count, Ordering::Relaxed);

        let prestream = self.rx_prestream.fetch_sub(nof_new_samples as i64, Ordering::Relaxed)
            - nof_new_samples as i64;
        if prestream >= 0 {
            return;
        }

        self.rx_time_passed.store(count, Ordering::Release);

        let notification_next = self.notification_next.load(Ordering::Relaxed);
        if count >= notification_next {
            // This thread is not allowed to block under any circumstances, so only
            // try for the lock; a reader momentarily inside `wait_until`'s
            // `wait_timeout` just picks up the notification on the next `advance`.
            let guard = match self.notify_mutex.try_lock() {
                Ok(guard) => Some(guard),
                Err(std::sync::TryLockError::Poisoned(e)) => Some(e.into_inner()),
                Err(std::sync::TryLockError::WouldBlock) => None,
            };
            if let Some(_guard) = guard {
                self.notify_cv.notify_all();
                self.notification_next
                    .store(count + self.notification_period_samples, Ordering::Relaxed);
            }
        }
    }

    /// Blocks until `rx_time_passed >= target_time`, returning the observed
    /// value (which may exceed `target_time`).
    #[must_use]
    pub fn wait_until(&self, target_time: SampleTime) -> SampleTime {
        let mut now = self.rx_time_passed.load(Ordering::Acquire);
        if target_time < now {
            return now;
        }
        loop {
            if now >= target_time {
                return now;
            }
            let guard = self.notify_mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let (_guard, _timeout) = self
                .notify_cv
                .wait_timeout(guard, std::time::Duration::from_millis(100))
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            now = self.rx_time_passed.load(Ordering::Acquire);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small_buffer() -> RxRingBuffer {
        RxRingBuffer::new(2, 800, 1_000_000, 100, 0, 0)
    }

    #[test]
    fn rx_time_passed_is_nondecreasing() {
        let rb = small_buffer();
        let t0 = rb.get_rx_time_passed();
        unsafe {
            rb.write_slice(0, 100);
            rb.write_slice(1, 100);
        }
        rb.advance(0, 100);
        let t1 = rb.get_rx_time_passed();
        assert!(t1 >= t0);
    }

    #[test]
    fn advance_publishes_exact_count_after_no_overflow() {
        let rb = small_buffer();
        unsafe {
            rb.write_slice(0, 100);
        }
        rb.advance(0, 100);
        assert_eq!(rb.get_rx_time_passed(), 100);
    }

    #[test]
    fn jitter_within_window_does_not_snap() {
        let rb = small_buffer();
        unsafe {
            rb.write_slice(0, 100);
        }
        rb.advance(0, 100);
        unsafe {
            rb.write_slice(0, 50);
        }
        rb.advance(100, 50);
        assert_eq!(rb.get_rx_time_passed(), 150);
    }

    #[test]
    fn jitter_outside_window_snaps_to_observed_time() {
        let rb = small_buffer();
        unsafe {
            rb.write_slice(0, 100);
        }
        rb.advance(1000, 100);
        unsafe {
            rb.write_slice(0, 100);
        }
        rb.advance(1500, 100);
        assert_eq!(rb.get_rx_time_passed(), 1600);
    }

    #[test]
    fn wrap_straddling_write_stays_contiguous() {
        let rb = RxRingBuffer::new(1, 800, 1_000_000, 100, 0, 0);
        // Drive the internal counter near the wrap boundary first.
        for _ in 0..7 {
            unsafe {
                rb.write_slice(0, 100);
            }
            let t = rb.get_rx_time_passed();
            rb.advance(t, 100);
        }
        assert_eq!(rb.write_index(), 700);
        let idx = rb.write_index();
        unsafe {
            let slice = rb.write_slice(0, 100);
            for (i, s) in slice.iter_mut().enumerate() {
                *s = Sample::new(i as f32, 0.0);
            }
        }
        rb.advance(700, 100);
        let storage = rb.ant_stream(0);
        // overhang of 0 in this case since 700 + 100 == 800 exactly; push one more.
        assert_eq!(idx, 700);
        assert_eq!(storage[700].re, 0.0);
    }

    #[test]
    fn wait_until_returns_immediately_if_already_reached() {
        let rb = small_buffer();
        assert_eq!(rb.wait_until(0), 0);
    }
}
