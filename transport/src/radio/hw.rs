//! Abstract hardware interface and the in-process simulator that implements
//! it. Device-specific drivers (USRP B210/N310/N320/X410) are out of scope;
//! [`SimulatedHw`] is the one concrete implementation this crate ships, used
//! by its own tests and the demo binaries.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::common::threads::spawn_rt;
use crate::config::{NOF_ANTENNAS_MAX, ThreadCorePrioConfig, validate_antenna_count};
use crate::error::{Result, TransportError};

use super::buffer_rx::RxRingBuffer;
use super::buffer_tx_pool::TxBufferPool;
use super::sample::{Sample, SampleTime};
use super::tx_thread::{TxThread, TxThreadConfig};

/// Device-specific minimum settling times, consumed by the MAC layer; the
/// core only exposes the getter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettlingTimesSamples {
    pub freq: u32,
    pub gain: u32,
    pub turnaround: u32,
}

/// One of the four asynchronous device conditions the TX async-error helper
/// drains and logs. Never triggers a retransmit — see `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncErrorKind {
    Underflow,
    SequenceError,
    LateCommand,
    Timeout,
}

/// Cumulative count of each [`AsyncErrorKind`] observed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsyncErrorStats {
    pub underflow: u64,
    pub sequence_error: u64,
    pub late_command: u64,
    pub timeout: u64,
}

#[derive(Default)]
struct AsyncErrorCounters {
    underflow: AtomicU64,
    sequence_error: AtomicU64,
    late_command: AtomicU64,
    timeout: AtomicU64,
}

impl AsyncErrorCounters {
    fn snapshot(&self) -> AsyncErrorStats {
        AsyncErrorStats {
            underflow: self.underflow.load(Ordering::Relaxed),
            sequence_error: self.sequence_error.load(Ordering::Relaxed),
            late_command: self.late_command.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
        }
    }
}

/// Contract a radio device (real or simulated) exposes to the rest of the
/// core. See `spec.md` §4.7 for the full narrative description.
pub trait HardwareAbstraction: Send + Sync {
    fn id(&self) -> u32;

    /// Whether this implementation is a simulator; [`super::pps_sync::PpsSync`]
    /// skips the extra post-PPS guard sleep for simulators.
    fn is_simulator(&self) -> bool;

    /// Device rounds **up** to the closest achievable sample rate `>= requested`.
    fn set_sample_rate(&self, requested: u32) -> u32;

    /// # Errors
    /// Returns [`TransportError::Configuration`] if `n` is not a valid antenna count.
    fn set_antenna_count(&self, n: u32) -> Result<()>;

    fn set_tx_gap_samples(&self, n: u32);
    fn tx_gap_samples(&self) -> u32;

    fn initialize_tx_pool(&self, max_samples: usize) -> Arc<TxBufferPool>;
    fn initialize_rx_ring(&self, length_samples: usize) -> Arc<RxRingBuffer>;
    fn initialize_device(&self);

    /// Queues subsequent commands for execution at sample time `t`; `t < 0`
    /// clears the pending time (immediate).
    fn set_command_time(&self, t: SampleTime);
    fn command_time(&self) -> SampleTime;

    fn set_freq(&self, hz: f64) -> f64;
    fn set_tx_power_at_0dbfs(&self, dbm: f32, ant_idx: usize);
    fn set_rx_power_at_0dbfs(&self, dbm: f32, ant_idx: usize);

    fn pps_wait_for_next(&self);
    fn pps_set_full_sec_at_next_pps_and_wait(&self, full_sec: i64);

    fn settling_times_samples(&self) -> SettlingTimesSamples;

    /// Spawns, in order: TX async-error helper, TX thread, a short settling
    /// sleep, RX thread. Order matters: the RX thread enabling upper layers
    /// must start last.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if called before
    /// [`Self::initialize_tx_pool`] and [`Self::initialize_rx_ring`], and any
    /// I/O error the underlying thread spawn reports.
    fn start_threads_and_iq_streaming(&self) -> Result<()>;

    fn work_stop(&self);
    fn keep_running(&self) -> bool;
}

/// In-process simulator: no real device, PPS edges are simulated on a fixed
/// cadence, sample rate request is always granted as-is. `keep_running` and
/// `tx_gap_samples` are `Arc`-wrapped so the threads spawned by
/// [`Self::start_threads_and_iq_streaming`] can observe live updates without
/// borrowing `self` — they must be `'static` once spawned.
pub struct SimulatedHw {
    id: u32,
    antenna_count: AtomicI64,
    tx_gap_samples: Arc<AtomicI64>,
    command_time: AtomicI64,
    keep_running: Arc<AtomicBool>,
    pps_full_sec_at_next: Mutex<i64>,
    pps_edge_count: AtomicI64,
    tx_pool: Mutex<Option<Arc<TxBufferPool>>>,
    rx_ring: Mutex<Option<Arc<RxRingBuffer>>>,
    async_errors: Arc<AsyncErrorCounters>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulatedHw {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            antenna_count: AtomicI64::new(1),
            tx_gap_samples: Arc::new(AtomicI64::new(0)),
            command_time: AtomicI64::new(-1),
            keep_running: Arc::new(AtomicBool::new(true)),
            pps_full_sec_at_next: Mutex::new(0),
            pps_edge_count: AtomicI64::new(0),
            tx_pool: Mutex::new(None),
            rx_ring: Mutex::new(None),
            async_errors: Arc::new(AsyncErrorCounters::default()),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Test/demo hook: advances the simulated PPS edge counter by one,
    /// waking anything blocked in [`Self::pps_wait_for_next`].
    pub fn fire_pps_edge(&self) {
        self.pps_edge_count.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn pps_edge_count(&self) -> i64 {
        self.pps_edge_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pps_full_sec_at_next(&self) -> i64 {
        *self.pps_full_sec_at_next.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Test/demo hook: records one simulated device asynchronous error,
    /// picked up and logged by the TX async-error helper thread on its next
    /// pass.
    pub fn simulate_async_error(&self, kind: AsyncErrorKind) {
        let counter = match kind {
            AsyncErrorKind::Underflow => &self.async_errors.underflow,
            AsyncErrorKind::SequenceError => &self.async_errors.sequence_error,
            AsyncErrorKind::LateCommand => &self.async_errors.late_command,
            AsyncErrorKind::Timeout => &self.async_errors.timeout,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn async_error_stats(&self) -> AsyncErrorStats {
        self.async_errors.snapshot()
    }
}

impl HardwareAbstraction for SimulatedHw {
    fn id(&self) -> u32 {
        self.id
    }

    fn is_simulator(&self) -> bool {
        true
    }

    fn set_sample_rate(&self, requested: u32) -> u32 {
        requested
    }

    fn set_antenna_count(&self, n: u32) -> Result<()> {
        validate_antenna_count(n)?;
        self.antenna_count.store(i64::from(n), Ordering::Relaxed);
        Ok(())
    }

    fn set_tx_gap_samples(&self, n: u32) {
        self.tx_gap_samples.store(i64::from(n), Ordering::Relaxed);
    }

    fn tx_gap_samples(&self) -> u32 {
        self.tx_gap_samples.load(Ordering::Relaxed) as u32
    }

    fn initialize_tx_pool(&self, max_samples: usize) -> Arc<TxBufferPool> {
        let antennas = self.antenna_count.load(Ordering::Relaxed) as usize;
        let pool = Arc::new(TxBufferPool::new(self.id, antennas.max(1), 8, max_samples));
        *self.tx_pool.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::clone(&pool));
        pool
    }

    fn initialize_rx_ring(&self, length_samples: usize) -> Arc<RxRingBuffer> {
        let antennas = self.antenna_count.load(Ordering::Relaxed).max(1) as usize;
        let ring = Arc::new(RxRingBuffer::new(antennas, length_samples, 1_000_000, length_samples / 8, 0, 100));
        *self.rx_ring.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::clone(&ring));
        ring
    }

    fn initialize_device(&self) {}

    fn set_command_time(&self, t: SampleTime) {
        self.command_time.store(t, Ordering::Relaxed);
    }

    fn command_time(&self) -> SampleTime {
        self.command_time.load(Ordering::Relaxed)
    }

    fn set_freq(&self, hz: f64) -> f64 {
        hz
    }

    fn set_tx_power_at_0dbfs(&self, _dbm: f32, _ant_idx: usize) {}
    fn set_rx_power_at_0dbfs(&self, _dbm: f32, _ant_idx: usize) {}

    fn pps_wait_for_next(&self) {
        let start = self.pps_edge_count.load(Ordering::SeqCst);
        while self.pps_edge_count.load(Ordering::SeqCst) == start {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    fn pps_set_full_sec_at_next_pps_and_wait(&self, full_sec: i64) {
        *self.pps_full_sec_at_next.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = full_sec;
        self.pps_wait_for_next();
    }

    fn settling_times_samples(&self) -> SettlingTimesSamples {
        SettlingTimesSamples {
            freq: 100,
            gain: 50,
            turnaround: 20,
        }
    }

    fn start_threads_and_iq_streaming(&self) -> Result<()> {
        let pool = self
            .tx_pool
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or_else(|| TransportError::Configuration("initialize_tx_pool must run before start_threads_and_iq_streaming".to_string()))?;
        let ring = self
            .rx_ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or_else(|| TransportError::Configuration("initialize_rx_ring must run before start_threads_and_iq_streaming".to_string()))?;

        self.keep_running.store(true, Ordering::Release);

        let mut handles = Vec::with_capacity(3);

        let async_errors = Arc::clone(&self.async_errors);
        let keep_running = Arc::clone(&self.keep_running);
        handles.push(spawn_rt(
            &format!("hw{}-tx-async", self.id),
            ThreadCorePrioConfig::default(),
            move || {
                let mut last = AsyncErrorStats::default();
                while keep_running.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(5));
                    let snapshot = async_errors.snapshot();
                    if snapshot != last {
                        tracing::warn!(?snapshot, "tx async error counters updated");
                        last = snapshot;
                    }
                }
            },
        )?);

        let keep_running = Arc::clone(&self.keep_running);
        let tx_gap_samples = self.tx_gap_samples.load(Ordering::Relaxed) as u32;
        let tx_pool = Arc::clone(&pool);
        handles.push(spawn_rt(
            &format!("hw{}-tx", self.id),
            ThreadCorePrioConfig::default(),
            move || {
                let mut tx = TxThread::new(TxThreadConfig {
                    tx_gap_samples,
                    tx_time_advance_samples: 0,
                    leading_zero_samples: 0,
                    fresh_start_timeout: Duration::from_millis(100),
                });
                let mut expected_tx_order_id: i64 = 0;
                while keep_running.load(Ordering::Acquire) {
                    if let Some((_headers, next)) = tx.run_burst(tx_pool.as_ref(), expected_tx_order_id) {
                        expected_tx_order_id = next;
                    }
                }
            },
        )?);

        // Short settling sleep between the TX and RX threads starting, per
        // `spec.md` §4.7's thread-start ordering.
        std::thread::sleep(Duration::from_millis(5));

        let keep_running = Arc::clone(&self.keep_running);
        let rx_ring = Arc::clone(&ring);
        handles.push(spawn_rt(
            &format!("hw{}-rx", self.id),
            ThreadCorePrioConfig::default(),
            move || {
                let chunk = (rx_ring.ant_streams_length_samples() / 8).max(1);
                let mut next_time: SampleTime = 0;
                while keep_running.load(Ordering::Acquire) {
                    for antenna in 0..rx_ring.nof_antennas() {
                        // SAFETY: this is the only thread ever calling
                        // `write_slice`/`advance` on this ring.
                        unsafe {
                            rx_ring.write_slice(antenna, chunk).fill(Sample::ZERO);
                        }
                    }
                    rx_ring.advance(next_time, chunk);
                    next_time += chunk as i64;
                    std::thread::sleep(Duration::from_micros(500));
                }
            },
        )?);

        *self.threads.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = handles;
        Ok(())
    }

    fn work_stop(&self) {
        self.keep_running.store(false, Ordering::Release);
    }

    fn keep_running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
    }
}

impl Drop for SimulatedHw {
    /// Joins the threads spawned by [`HardwareAbstraction::start_threads_and_iq_streaming`],
    /// matching the shutdown order `spec.md` §5 describes: set the flag, then
    /// join (RX, TX, async helper — the reverse of start order, since they
    /// were pushed TX-async, TX, RX and we join the vector as stored, RX
    /// first).
    fn drop(&mut self) {
        self.keep_running.store(false, Ordering::Release);
        let mut handles = self.threads.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for handle in handles.drain(..).rev() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn antenna_count_must_be_power_of_two() {
        let hw = SimulatedHw::new(0);
        assert!(hw.set_antenna_count(4).is_ok());
        assert!(matches!(
            hw.set_antenna_count(3),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn antenna_count_respects_max() {
        let hw = SimulatedHw::new(0);
        assert!(hw.set_antenna_count(NOF_ANTENNAS_MAX * 2).is_err());
    }

    #[test]
    fn pps_wait_for_next_unblocks_on_fire() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let hw = StdArc::new(SimulatedHw::new(0));
        let hw2 = StdArc::clone(&hw);
        let handle = thread::spawn(move || hw2.pps_wait_for_next());
        thread::sleep(std::time::Duration::from_millis(5));
        hw.fire_pps_edge();
        handle.join().unwrap();
    }

    #[test]
    fn starting_threads_before_initializing_buffers_is_an_error() {
        let hw = SimulatedHw::new(0);
        assert!(matches!(
            hw.start_threads_and_iq_streaming(),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn async_error_counters_accumulate_per_kind() {
        let hw = SimulatedHw::new(0);
        hw.simulate_async_error(AsyncErrorKind::Underflow);
        hw.simulate_async_error(AsyncErrorKind::Underflow);
        hw.simulate_async_error(AsyncErrorKind::Timeout);
        let stats = hw.async_error_stats();
        assert_eq!(stats.underflow, 2);
        assert_eq!(stats.timeout, 1);
        assert_eq!(stats.sequence_error, 0);
    }

    #[test]
    fn start_threads_drains_a_filled_tx_buffer_and_advances_rx_time() {
        let hw = SimulatedHw::new(0);
        let pool = hw.initialize_tx_pool(4096);
        let ring = hw.initialize_rx_ring(8000);

        let (_idx, buf) = pool.get_buffer_tx_to_fill().unwrap();
        let streams = buf.get_ant_streams(500);
        for s in streams {
            s[..500].fill(Sample::ZERO);
        }
        buf.set_tx_length_samples_cnt(500);
        buf.set_transmittable(crate::radio::buffer_tx::TxBufferMeta {
            tx_order_id: 0,
            tx_time: 0,
            busy_wait_us: 5_000,
            ..Default::default()
        });

        hw.start_threads_and_iq_streaming().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        hw.work_stop();

        // The TX thread should have pulled the filled buffer back out of the
        // pool, freeing its slot.
        assert!(pool.get_buffer_tx_to_fill().is_some());
        // The RX thread should have advanced the published sample counter.
        assert!(ring.get_rx_time_passed() > 0);
    }
}
