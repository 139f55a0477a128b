//! PPS rendezvous demo binary.
//!
//! Grounded on `original_source/apps/sync/sync.cpp`: the smallest program
//! that demonstrates `spec.md` §8 scenario 6 — two hardware instances agree
//! on a common `time` at the same PPS edge. Uses
//! [`dect_phy_transport::radio::hw::SimulatedHw`] since real USRP drivers are
//! out of scope.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use dect_phy_transport::radio::hw::{HardwareAbstraction, SimulatedHw};
use dect_phy_transport::radio::pps_sync::{EpochPolicy, PpsSync};

#[derive(Debug, Parser)]
#[command(name = "sync", about = "DECT-2020 NR PHY transport PPS rendezvous demo")]
struct Cli {
    /// Number of simulated hardware instances to synchronize.
    #[arg(short = 'n', long, default_value_t = 2)]
    nof_hw: u32,
}

struct App {
    keep_running: Arc<AtomicBool>,
}

impl App {
    fn new() -> Self {
        Self {
            keep_running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Runs the rendezvous across `nof_hw` simulated radios, driving
    /// simulated PPS edges from a background thread, and returns the
    /// `time = 0` (or TAI+1) value each instance agreed on.
    fn run(&self, nof_hw: u32) -> Vec<i64> {
        let sync = Arc::new(PpsSync::new(EpochPolicy::SyncToZero));
        let hws: Vec<Arc<SimulatedHw>> = (0..nof_hw).map(|i| Arc::new(SimulatedHw::new(i))).collect();
        for _ in 0..nof_hw {
            sync.expect_one_more();
        }

        let keep_running = Arc::clone(&self.keep_running);
        let pps_hws = hws.clone();
        let driver = thread::spawn(move || {
            while keep_running.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(5));
                for hw in &pps_hws {
                    hw.fire_pps_edge();
                }
            }
        });

        let handles: Vec<_> = hws
            .iter()
            .cloned()
            .map(|hw| {
                let sync = Arc::clone(&sync);
                thread::spawn(move || {
                    sync.sync_procedure(hw.as_ref()).expect("pps rendezvous watchdog expired");
                    hw.pps_full_sec_at_next()
                })
            })
            .collect();

        let results: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        self.keep_running.store(false, Ordering::Release);
        driver.join().unwrap();
        results
    }
}

#[cfg(unix)]
fn install_sigint_handler() -> miette::Result<Arc<AtomicBool>> {
    let shutdown_requested = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown_requested))
        .map_err(|e| miette::miette!("failed to install SIGINT handler: {e}"))?;
    Ok(shutdown_requested)
}

fn main() -> miette::Result<()> {
    dect_phy_transport::logging::TracingConfig::default()
        .install_global()
        .ok();

    #[cfg(unix)]
    let _shutdown_requested = install_sigint_handler()?;

    let cli = Cli::parse();
    tracing::info!(nof_hw = cli.nof_hw, "starting pps rendezvous");

    let app = App::new();
    let results = app.run(cli.nof_hw);
    tracing::info!(?results, "pps rendezvous complete");

    let all_agree = results.iter().all(|&t| t == results[0]);
    if !all_agree {
        return Err(miette::miette!("hardware instances disagree on rendezvous time: {results:?}"));
    }

    Ok(())
}
