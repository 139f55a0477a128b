//! TX thread burst-stitching algorithm.
//!
//! Grounded on `spec.md` §4.4's per-iteration narrative and
//! `original_source/lib/include/dectnrp/radio/buffer_tx_pool.hpp` (the
//! `wait_for_specific_tx_order_id_{to,busy_to}` pair this module drives). No
//! `original_source` file contains the stitching loop itself — it lives in
//! the out-of-scope device driver (`hw_usrp.cpp`) — so this is modeled
//! directly from the spec's state machine description (`IdleBetweenBursts` /
//! `InBurst` / `Closing`, per `spec.md` §9's redesign flag) rather than
//! ported from source.

use std::time::Duration;

use super::buffer_tx_pool::TxBufferPool;
use super::sample::{SampleTime, TxOrderId};

/// A single stream-header-tagged span the TX thread hands to the device.
/// `start_of_burst`/`end_of_burst`/`has_time_spec`/`time_spec` mirror the
/// device command fields `spec.md` §6(f) names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    pub has_time_spec: bool,
    pub time_spec: SampleTime,
    pub length_samples: usize,
    /// `true` for a zero-fill gap inserted between two stitched packets
    /// rather than filler-written sample data.
    pub is_gap_fill: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxThreadStats {
    pub bursts_sent: u64,
    /// Number of times a second (or later) buffer was stitched onto an
    /// already-open burst instead of starting a new one.
    pub buffer_tx_sent_consecutive: u64,
}

/// Per-device tuning for the stitching algorithm.
#[derive(Debug, Clone, Copy)]
pub struct TxThreadConfig {
    /// Maximum intra-burst zero-fill width the thread may insert without
    /// splitting into two bursts (`spec.md` §4.7 `set_tx_gap_samples`).
    pub tx_gap_samples: u32,
    /// Device-specific pipeline compensation subtracted from `meta.tx_time`.
    pub tx_time_advance_samples: i64,
    /// Leading zero-pad samples sent once at the start of a burst.
    pub leading_zero_samples: u32,
    /// Upper bound on how long `wait_for_specific_tx_order_id_to` blocks
    /// when starting a fresh burst (not time-critical: the burst is idle).
    pub fresh_start_timeout: Duration,
}

/// Drives [`TxBufferPool`] one burst at a time. Not itself threaded — the
/// real-time loop (`HardwareAbstraction::start_threads_and_iq_streaming`)
/// calls [`Self::run_burst`] repeatedly from the dedicated TX thread, one
/// call per hardware burst.
pub struct TxThread {
    config: TxThreadConfig,
    stats: TxThreadStats,
}

impl TxThread {
    #[must_use]
    pub fn new(config: TxThreadConfig) -> Self {
        Self {
            config,
            stats: TxThreadStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> TxThreadStats {
        self.stats
    }

    /// Runs exactly one hardware burst, starting fresh at
    /// `expected_tx_order_id`. Blocks (bounded by
    /// [`TxThreadConfig::fresh_start_timeout`]) for the first buffer to
    /// become `READY`; returns `None` on timeout (the caller retries the
    /// same `expected_tx_order_id` on its next iteration, per `spec.md`
    /// §4.4's failure semantics).
    ///
    /// On success, returns the stream headers emitted (in order) and the
    /// next `tx_order_id` the caller should start its following burst at.
    pub fn run_burst(
        &mut self,
        pool: &TxBufferPool,
        expected_tx_order_id: TxOrderId,
    ) -> Option<(Vec<StreamHeader>, TxOrderId)> {
        let mut current_idx =
            pool.wait_for_specific_tx_order_id_to(expected_tx_order_id, self.config.fresh_start_timeout)?;

        let mut headers = Vec::new();
        let mut next_expected = expected_tx_order_id;
        let mut first_packet = true;

        loop {
            let buf = pool.buffer(current_idx);
            let meta = buf.meta();
            let tx_time = meta.tx_time - self.config.tx_time_advance_samples;
            let length = buf.tx_length_samples() as usize;
            buf.wait_for_samples_busy_nto(length as u32);

            if first_packet {
                let burst_start = tx_time - i64::from(self.config.leading_zero_samples);
                if self.config.leading_zero_samples > 0 {
                    headers.push(StreamHeader {
                        start_of_burst: true,
                        end_of_burst: false,
                        has_time_spec: true,
                        time_spec: burst_start,
                        length_samples: self.config.leading_zero_samples as usize,
                        is_gap_fill: true,
                    });
                    headers.push(StreamHeader {
                        start_of_burst: false,
                        end_of_burst: false,
                        has_time_spec: false,
                        time_spec: 0,
                        length_samples: length,
                        is_gap_fill: false,
                    });
                } else {
                    headers.push(StreamHeader {
                        start_of_burst: true,
                        end_of_burst: false,
                        has_time_spec: true,
                        time_spec: burst_start,
                        length_samples: length,
                        is_gap_fill: false,
                    });
                }
            } else {
                headers.push(StreamHeader {
                    start_of_burst: false,
                    end_of_burst: false,
                    has_time_spec: false,
                    time_spec: 0,
                    length_samples: length,
                    is_gap_fill: false,
                });
            }
            first_packet = false;

            let next_id = if meta.tx_order_id_expect_next >= 0 {
                meta.tx_order_id_expect_next
            } else {
                meta.tx_order_id + 1
            };
            let current_end_time = tx_time + length as i64;

            let next_idx = pool.wait_for_specific_tx_order_id_busy_to(next_id, meta.busy_wait_us);
            let stitched = next_idx.and_then(|ni| {
                let next_meta = pool.buffer(ni).meta();
                let gap = next_meta.tx_time - self.config.tx_time_advance_samples - current_end_time;
                (gap >= 0 && gap as u32 <= self.config.tx_gap_samples).then_some((ni, gap as usize))
            });

            // Zero the gap into the current buffer's own tail, per the stitching
            // step, before handing the buffer back to the pool.
            if let Some((_, gap)) = stitched {
                if gap > 0 {
                    pool.buffer(current_idx).set_zero(length, gap);
                }
            }

            pool.buffer(current_idx).set_transmitted_or_abort();

            match stitched {
                Some((next_idx, gap)) => {
                    if gap > 0 {
                        if let Some(last) = headers.last_mut() {
                            last.length_samples += gap;
                        }
                    }
                    self.stats.buffer_tx_sent_consecutive += 1;
                    current_idx = next_idx;
                    next_expected = next_id;
                }
                None => {
                    if let Some(last) = headers.last_mut() {
                        last.end_of_burst = true;
                    }
                    next_expected = next_id;
                    self.stats.bursts_sent += 1;
                    return Some((headers, next_expected));
                }
            }
        }
    }
}
