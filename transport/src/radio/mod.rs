//! Radio data plane: sample buffers, hardware abstraction, and multi-device
//! PPS synchronization.

pub mod buffer_rx;
pub mod buffer_tx;
pub mod buffer_tx_pool;
pub mod hw;
pub mod pps_sync;
pub mod sample;
pub mod tx_thread;
