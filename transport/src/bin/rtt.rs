//! RTT probe demo binary.
//!
//! Grounded on `original_source/apps/rtt/rtt.cpp`: sends a datagram of
//! configurable length to an echo peer and measures the MAC-to-MAC
//! round-trip embedded in the last 8 bytes of the response (`spec.md` §6's
//! wire format). A single `App` owns all state (no global `ctrl_c_pressed`,
//! per `spec.md` §9's redesign flag); one SIGINT handler flips one
//! `Arc<AtomicBool>`.

use std::io::Write;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use serde::Serialize;

/// Smallest probe datagram the peer is expected to echo.
pub const TFW_RTT_TX_LENGTH_MINIMUM_BYTE: usize = 16;
/// Largest datagram this binary will ever send.
pub const TFW_RTT_TX_LENGTH_MAXIMUM_BYTE: usize = 1200;
/// Leading bytes of the response that must match the request verbatim.
pub const TFW_RTT_TX_VS_RX_VERIFICATION_LENGTH_BYTE: usize = 8;

#[derive(Debug, Parser)]
#[command(name = "rtt", about = "DECT-2020 NR PHY transport RTT probe")]
struct Cli {
    /// Transmission interval between measurements, in microseconds.
    #[arg(short = 'i', long, default_value_t = 0)]
    interval: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct MeasurementResult {
    length: usize,
    rtt_mac2mac_ns: i64,
}

#[derive(Debug, Serialize)]
struct RttExport {
    elapsed_ns: Vec<i64>,
    elapsed_total_ns: i64,
}

struct App {
    socket: UdpSocket,
    keep_running: Arc<AtomicBool>,
    tx_buffer: Vec<u8>,
    rx_buffer: Vec<u8>,
    json_file_cnt: u64,
}

impl App {
    fn new(socket: UdpSocket, keep_running: Arc<AtomicBool>) -> Self {
        Self {
            socket,
            keep_running,
            tx_buffer: vec![0u8; TFW_RTT_TX_LENGTH_MAXIMUM_BYTE],
            rx_buffer: vec![0u8; TFW_RTT_TX_LENGTH_MAXIMUM_BYTE],
            json_file_cnt: 0,
        }
    }

    /// Sends a random `n_byte` datagram and waits for the echoed response,
    /// extracting the MAC-to-MAC RTT from its trailing 8 bytes. A timed-out
    /// or malformed response yields a negative `rtt_mac2mac_ns`.
    fn send_and_await_response(&mut self, n_byte: usize) -> MeasurementResult {
        assert!(TFW_RTT_TX_LENGTH_MINIMUM_BYTE <= n_byte, "message too small");
        assert!(n_byte <= TFW_RTT_TX_LENGTH_MAXIMUM_BYTE, "message too large");

        let mut rng = rand::rng();
        for b in &mut self.tx_buffer[..n_byte] {
            *b = rng.random();
        }

        if self.socket.send(&self.tx_buffer[..n_byte]).is_err() {
            return MeasurementResult::default_error();
        }

        match self.socket.recv(&mut self.rx_buffer) {
            Ok(n) if n == n_byte => {
                let verified = self.tx_buffer[..TFW_RTT_TX_VS_RX_VERIFICATION_LENGTH_BYTE]
                    == self.rx_buffer[..TFW_RTT_TX_VS_RX_VERIFICATION_LENGTH_BYTE];
                if !verified {
                    tracing::warn!("RX message has different content than TX message");
                }
                let mut rtt_bytes = [0u8; 8];
                rtt_bytes.copy_from_slice(
                    &self.rx_buffer[TFW_RTT_TX_VS_RX_VERIFICATION_LENGTH_BYTE
                        ..TFW_RTT_TX_VS_RX_VERIFICATION_LENGTH_BYTE + 8],
                );
                MeasurementResult {
                    length: n,
                    rtt_mac2mac_ns: i64::from_le_bytes(rtt_bytes),
                }
            }
            Ok(n) => {
                tracing::warn!(expected = n_byte, got = n, "RX message has different size, probe?");
                MeasurementResult::default_error()
            }
            Err(_) => {
                tracing::warn!("RTT probe timed out");
                MeasurementResult::default_error()
            }
        }
    }

    /// Runs one batch of `count` measurements, returning the per-measurement
    /// RTTs (negative on failure) and the total wall time spent, in
    /// nanoseconds.
    fn run_batch(&mut self, count: usize, n_byte: usize, interval_us: i64) -> (Vec<i64>, i64) {
        let watch = crate_watch();
        let mut elapsed_ns = Vec::with_capacity(count);
        for _ in 0..count {
            if !self.keep_running.load(Ordering::Acquire) {
                break;
            }
            let started = crate_watch();
            let result = self.send_and_await_response(n_byte);
            elapsed_ns.push(if result.length == n_byte {
                result.rtt_mac2mac_ns
            } else {
                -1
            });
            if interval_us > 0 {
                let spent_us = started.elapsed(dect_phy_transport::common::watch::Resolution::Micros);
                let remaining = interval_us - spent_us;
                if remaining > 0 {
                    dect_phy_transport::common::watch::Watch::sleep(
                        remaining,
                        dect_phy_transport::common::watch::Resolution::Micros,
                    );
                }
            }
        }
        let elapsed_total_ns = watch.elapsed(dect_phy_transport::common::watch::Resolution::Nanos);
        (elapsed_ns, elapsed_total_ns)
    }

    fn save_as_json(&mut self, identifier: &str, elapsed_ns: &[i64], elapsed_total_ns: i64) -> std::io::Result<String> {
        let filename = format!("rtt_external_{identifier}_{:010}.json", self.json_file_cnt);
        self.json_file_cnt += 1;
        let export = RttExport {
            elapsed_ns: elapsed_ns.to_vec(),
            elapsed_total_ns,
        };
        let body = serde_json::to_string_pretty(&export)?;
        let mut file = std::fs::File::create(&filename)?;
        file.write_all(body.as_bytes())?;
        Ok(filename)
    }
}

impl MeasurementResult {
    fn default_error() -> Self {
        Self {
            length: 0,
            rtt_mac2mac_ns: -1,
        }
    }
}

fn crate_watch() -> dect_phy_transport::common::watch::Watch {
    dect_phy_transport::common::watch::Watch::new()
}

const RTT_MEASUREMENTS_PER_PRINT: usize = 3;

/// Installs one SIGINT handler and bridges it to a `keep_running` flag (the
/// sense `App` expects: `true` means continue). `signal_hook::flag::register`
/// itself only ever sets its target flag to `true` on receipt, so a small
/// watcher thread flips the sense.
fn install_sigint_handler() -> miette::Result<Arc<AtomicBool>> {
    let keep_running = Arc::new(AtomicBool::new(true));
    #[cfg(unix)]
    {
        let shutdown_requested = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown_requested))
            .map_err(|e| miette::miette!("failed to install SIGINT handler: {e}"))?;
        let keep_running = Arc::clone(&keep_running);
        std::thread::spawn(move || {
            while !shutdown_requested.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(50));
            }
            keep_running.store(false, Ordering::Release);
        });
    }
    Ok(keep_running)
}

fn main() -> miette::Result<()> {
    dect_phy_transport::logging::TracingConfig::default()
        .install_global()
        .ok();

    let cli = Cli::parse();
    tracing::info!(interval = cli.interval, "starting rtt probe");

    let keep_running = install_sigint_handler()?;
    let socket = UdpSocket::bind("127.0.0.1:0").map_err(|e| miette::miette!("bind failed: {e}"))?;
    socket
        .set_read_timeout(Some(Duration::from_micros(100_000)))
        .map_err(|e| miette::miette!("set_read_timeout failed: {e}"))?;
    socket
        .connect("127.0.0.1:8050")
        .map_err(|e| miette::miette!("connect failed: {e}"))?;

    let mut app = App::new(socket, Arc::clone(&keep_running));
    while keep_running.load(Ordering::Acquire) {
        let (elapsed_ns, elapsed_total_ns) =
            app.run_batch(RTT_MEASUREMENTS_PER_PRINT, TFW_RTT_TX_LENGTH_MINIMUM_BYTE, cli.interval);
        if elapsed_ns.len() < RTT_MEASUREMENTS_PER_PRINT {
            break;
        }
        let filename = app
            .save_as_json("mac2mac", &elapsed_ns, elapsed_total_ns)
            .map_err(|e| miette::miette!("json export failed: {e}"))?;
        tracing::info!(filename, "rtt batch complete");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::net::UdpSocket as StdUdpSocket;
    use std::thread;

    fn spawn_echo_server(rtt_ns: i64) -> std::net::SocketAddr {
        let server = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; TFW_RTT_TX_LENGTH_MAXIMUM_BYTE];
            loop {
                let Ok((n, from)) = server.recv_from(&mut buf) else {
                    return;
                };
                let mut out = buf[..TFW_RTT_TX_VS_RX_VERIFICATION_LENGTH_BYTE].to_vec();
                out.extend_from_slice(&rtt_ns.to_le_bytes());
                out.resize(n, 0);
                let _ = server.send_to(&out, from);
            }
        });
        addr
    }

    #[test]
    #[serial]
    fn rtt_probe_handshake_reports_embedded_rtt() {
        let addr = spawn_echo_server(1_234_567);
        let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        socket.connect(addr).unwrap();

        let keep_running = Arc::new(AtomicBool::new(true));
        let mut app = App::new(socket, keep_running);

        let (elapsed_ns, elapsed_total_ns) =
            app.run_batch(RTT_MEASUREMENTS_PER_PRINT, TFW_RTT_TX_LENGTH_MINIMUM_BYTE, 0);

        assert_eq!(elapsed_ns, vec![1_234_567, 1_234_567, 1_234_567]);
        assert!(elapsed_total_ns >= 0);

        let dir = std::env::temp_dir().join(format!("rtt-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let prev_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&dir).unwrap();
        let filename = app.save_as_json("mac2mac", &elapsed_ns, elapsed_total_ns).unwrap();
        std::env::set_current_dir(prev_dir).unwrap();
        assert_eq!(filename, "rtt_external_mac2mac_0000000000.json");
    }

    #[test]
    fn malformed_response_length_is_reported_as_failure() {
        let server = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; TFW_RTT_TX_LENGTH_MAXIMUM_BYTE];
            if let Ok((_n, from)) = server.recv_from(&mut buf) {
                let _ = server.send_to(&[1, 2, 3], from);
            }
        });

        let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        socket.connect(server_addr).unwrap();
        let mut app = App::new(socket, Arc::new(AtomicBool::new(true)));
        let result = app.send_and_await_response(TFW_RTT_TX_LENGTH_MINIMUM_BYTE);
        assert_eq!(result.rtt_mac2mac_ns, -1);
    }
}
