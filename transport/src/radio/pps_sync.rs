//! Multi-device PPS rendezvous: every hardware instance in a synchronized
//! group calls [`PpsSync::sync_procedure`] once at startup; all return at
//! the same PPS edge with a common epoch in the clock domain of their
//! shared GPSDO. Grounded on the original's `pps_sync_t`.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::common::watch::{EpochClock, Resolution, Watch};
use crate::error::{Result, TransportError};

use super::hw::HardwareAbstraction;

const CV_WAIT_TIMEOUT: Duration = Duration::from_millis(100);
const CV_WAIT_WATCHDOG: Duration = Duration::from_secs(10);

/// If `true`, the common epoch set at the first synchronized PPS edge is
/// `TAI_now + 1s`; if `false`, it is zero. Mirrors a compile-time choice in
/// the original; kept as a runtime flag here since nothing forces it to be
/// fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochPolicy {
    SyncToTai,
    SyncToZero,
}

struct Barrier {
    nof_hw: Mutex<u32>,
    nof_hw_cnt: Mutex<u32>,
    cv: Condvar,
}

pub struct PpsSync {
    barrier: Barrier,
    epoch_policy: EpochPolicy,
}

impl PpsSync {
    #[must_use]
    pub fn new(epoch_policy: EpochPolicy) -> Self {
        Self {
            barrier: Barrier {
                nof_hw: Mutex::new(0),
                nof_hw_cnt: Mutex::new(0),
                cv: Condvar::new(),
            },
            epoch_policy,
        }
    }

    /// Registers one more hardware instance that will call
    /// [`Self::sync_procedure`]. Must be called once per instance before any
    /// of them start synchronizing.
    pub fn expect_one_more(&self) {
        let mut n = self.barrier.nof_hw.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *n += 1;
    }

    /// Blocks until every registered hardware instance has reached this
    /// call, then until the next PPS edge, then assigns a common epoch.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TimingViolation`] if the registration
    /// rendezvous takes longer than 10 seconds — a sign one of the expected
    /// devices never called in.
    pub fn sync_procedure(&self, hw: &dyn HardwareAbstraction) -> Result<()> {
        let nof_hw = *self.barrier.nof_hw.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let is_last = {
            let mut cnt = self
                .barrier
                .nof_hw_cnt
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *cnt += 1;
            *cnt == nof_hw
        };

        if is_last {
            hw.pps_wait_for_next();
            self.barrier.cv.notify_all();
        } else {
            let start = Instant::now();
            let mut cnt = self
                .barrier
                .nof_hw_cnt
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            while *cnt < nof_hw {
                if start.elapsed() > CV_WAIT_WATCHDOG {
                    return Err(TransportError::TimingViolation(
                        "pps registration barrier exceeded watchdog".to_string(),
                    ));
                }
                let (guard, _timeout) = self
                    .barrier
                    .cv
                    .wait_timeout(cnt, CV_WAIT_TIMEOUT)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                cnt = guard;
            }
        }

        // Every caller, including the one that just woke the others, waits
        // for a second PPS edge: this excludes the time spent in the
        // registration barrier from the synchronized epoch.
        hw.pps_wait_for_next();

        match self.epoch_policy {
            EpochPolicy::SyncToTai => {
                Watch::sleep(50, Resolution::Millis);
                let now_tai_sec = Watch::elapsed_since_epoch(Resolution::Seconds, EpochClock::Tai);
                hw.pps_set_full_sec_at_next_pps_and_wait(now_tai_sec + 1);
            }
            EpochPolicy::SyncToZero => {
                hw.pps_set_full_sec_at_next_pps_and_wait(0);
            }
        }

        // Real hardware needs extra margin to guarantee it has observed and
        // zeroed against a PPS edge before this call returns; the simulator
        // has no such latency and skips the wait.
        if !hw.is_simulator() {
            Watch::sleep(1500, Resolution::Millis);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::hw::SimulatedHw;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_hw_completes_without_blocking_on_anyone_else() {
        let sync = PpsSync::new(EpochPolicy::SyncToZero);
        sync.expect_one_more();
        let hw = SimulatedHw::new(0);

        let hw_arc = Arc::new(hw);
        let hw_for_pps = Arc::clone(&hw_arc);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            loop {
                hw_for_pps.fire_pps_edge();
                thread::sleep(Duration::from_millis(5));
                if hw_for_pps.pps_edge_count() > 3 {
                    break;
                }
            }
        });

        sync.sync_procedure(hw_arc.as_ref()).unwrap();
        assert_eq!(hw_arc.pps_full_sec_at_next(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn two_hw_instances_rendezvous_together() {
        let sync = Arc::new(PpsSync::new(EpochPolicy::SyncToZero));
        sync.expect_one_more();
        sync.expect_one_more();

        let hw_a = Arc::new(SimulatedHw::new(0));
        let hw_b = Arc::new(SimulatedHw::new(1));

        let pps_driver_a = Arc::clone(&hw_a);
        let pps_driver_b = Arc::clone(&hw_b);
        let driver = thread::spawn(move || {
            for _ in 0..6 {
                thread::sleep(Duration::from_millis(5));
                pps_driver_a.fire_pps_edge();
                pps_driver_b.fire_pps_edge();
            }
        });

        let sync_a = Arc::clone(&sync);
        let hw_a_thread = Arc::clone(&hw_a);
        let handle_a = thread::spawn(move || sync_a.sync_procedure(hw_a_thread.as_ref()).is_ok());

        let sync_b = Arc::clone(&sync);
        let hw_b_thread = Arc::clone(&hw_b);
        let handle_b = thread::spawn(move || sync_b.sync_procedure(hw_b_thread.as_ref()).is_ok());

        assert!(handle_a.join().unwrap());
        assert!(handle_b.join().unwrap());
        driver.join().unwrap();
    }
}
