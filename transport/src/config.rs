//! Plain-data configuration structs, deserializable from JSON for the demo
//! binaries. Mirrors the original's `hw_config_t` / `queue_size_t`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// CPU core + real-time priority hint for a single thread.
///
/// `prio_offset` in `[0, 99]` maps to `SCHED_FIFO` priority `99 -
/// prio_offset` (0 = max priority); negative leaves scheduling to the OS.
/// `cpu_core` pins to that core index; negative leaves affinity unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadCorePrioConfig {
    #[serde(default = "default_neg_one")]
    pub prio_offset: i32,
    #[serde(default = "default_neg_one")]
    pub cpu_core: i32,
}

fn default_neg_one() -> i32 {
    -1
}

impl Default for ThreadCorePrioConfig {
    fn default() -> Self {
        Self {
            prio_offset: -1,
            cpu_core: -1,
        }
    }
}

/// Upper bound on how many antennas a single hardware instance may expose.
pub const NOF_ANTENNAS_MAX: u32 = 8;

/// Hardware instance configuration, one per radio device (real or simulated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwConfig {
    pub id: u32,
    pub hw_name: String,
    pub nof_buffer_tx: u32,
    pub turn_around_time_us: u32,
    pub tx_burst_leading_zero_us: u32,
    pub tx_time_advance_smpl: u32,
    pub rx_prestream_ms: u32,
    pub rx_notification_period_us: u32,
    #[serde(default)]
    pub tx_thread_config: ThreadCorePrioConfig,
    #[serde(default)]
    pub rx_thread_config: ThreadCorePrioConfig,
    /// `>1` for speedup, `<-1` for slowdown; only meaningful for simulated hardware.
    #[serde(default)]
    pub sim_sample_rate_speedup: i32,
}

impl HwConfig {
    /// Validates the configuration, matching the fatal-at-startup contract
    /// for configuration errors.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if `nof_buffer_tx` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.nof_buffer_tx == 0 {
            return Err(TransportError::Configuration(
                "nof_buffer_tx must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Datagram queue capacity configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSizeConfig {
    pub n_datagram: u32,
    pub n_datagram_max_byte: u32,
}

impl QueueSizeConfig {
    pub const MAX_N_DATAGRAM: u32 = 4096;
    pub const MAX_N_DATAGRAM_BYTE: u32 = 1 << 20;

    /// Validates this configuration against the crate's limits.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if `n_datagram` or
    /// `n_datagram_max_byte` is zero or exceeds the crate's limits.
    pub fn validate(&self) -> Result<()> {
        if self.n_datagram == 0 || self.n_datagram > Self::MAX_N_DATAGRAM {
            return Err(TransportError::Configuration(format!(
                "n_datagram out of range: {}",
                self.n_datagram
            )));
        }
        if self.n_datagram_max_byte == 0 || self.n_datagram_max_byte > Self::MAX_N_DATAGRAM_BYTE {
            return Err(TransportError::Configuration(format!(
                "n_datagram_max_byte out of range: {}",
                self.n_datagram_max_byte
            )));
        }
        Ok(())
    }
}

/// `n ∈ {1,2,4,...}`, power of two, `<= NOF_ANTENNAS_MAX`.
///
/// # Errors
///
/// Returns [`TransportError::Configuration`] if `n` is not a power of two or
/// exceeds [`NOF_ANTENNAS_MAX`].
pub fn validate_antenna_count(n: u32) -> Result<()> {
    if n == 0 || !n.is_power_of_two() || n > NOF_ANTENNAS_MAX {
        return Err(TransportError::Configuration(format!(
            "antenna count must be a power of two <= {NOF_ANTENNAS_MAX}, got {n}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1 ; "minimum")]
    #[test_case(2 ; "two")]
    #[test_case(4 ; "four")]
    #[test_case(8 ; "max")]
    fn valid_antenna_counts_are_accepted(n: u32) {
        assert!(validate_antenna_count(n).is_ok());
    }

    #[test_case(0 ; "zero")]
    #[test_case(3 ; "not a power of two")]
    #[test_case(16 ; "exceeds max")]
    fn invalid_antenna_counts_are_rejected(n: u32) {
        assert!(validate_antenna_count(n).is_err());
    }

    #[test_case(0, 16 => false ; "n_datagram zero")]
    #[test_case(4096, 16 => true ; "n_datagram at max")]
    #[test_case(4097, 16 => false ; "n_datagram over max")]
    #[test_case(4, 0 => false ; "n_datagram_max_byte zero")]
    #[test_case(4, 1 << 20 => true ; "n_datagram_max_byte at max")]
    #[test_case(4, (1 << 20) + 1 => false ; "n_datagram_max_byte over max")]
    fn queue_size_config_validation(n_datagram: u32, n_datagram_max_byte: u32) -> bool {
        QueueSizeConfig {
            n_datagram,
            n_datagram_max_byte,
        }
        .validate()
        .is_ok()
    }
}
