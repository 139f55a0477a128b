//! The `Job` tagged union carried end to end through [`super::job_queue`].
//!
//! Grounded on the original's `job_t`. The PHY-internal report payloads
//! (`regular_report_t`, `irregular_report_t`, `sync_report_t`) belong to
//! signal processing, which is out of scope here; they're represented as
//! thin placeholders that carry only the fields the dispatch core itself
//! touches (ordering, logging, size).

use strum_macros::Display;

use crate::radio::sample::{ConnectionIndex, SampleTime};

/// Placeholder for a regular (in-sequence) PHY processing report.
#[derive(Debug, Clone)]
pub struct RegularReport {
    pub worker_id: u32,
    pub rx_time: SampleTime,
}

/// Placeholder for an irregular (out-of-sequence, e.g. resynchronization)
/// PHY processing report.
#[derive(Debug, Clone)]
pub struct IrregularReport {
    pub worker_id: u32,
    pub rx_time: SampleTime,
}

/// Placeholder for a synchronization-layer report (new packet detected).
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub worker_id: u32,
    pub detect_time: SampleTime,
}

/// Produced by [`crate::application::ingress::IngressServer`] for each
/// datagram that clears the job-rate throttle.
#[derive(Debug, Clone, Copy)]
pub struct IngressReport {
    pub conn_idx: ConnectionIndex,
    pub n_byte: u32,
    /// Nanoseconds since the ingress server started, at enqueue time.
    pub elapsed_ns_since_start: i64,
}

/// `Display` prints just the variant name (`"Regular"`, `"Ingress"`, ...) —
/// used in `tracing` fields where the report's kind matters but its payload
/// doesn't belong in a log line.
#[derive(Debug, Clone, Display)]
pub enum JobContent {
    Regular(RegularReport),
    Irregular(IrregularReport),
    Sync(SyncReport),
    Ingress(IngressReport),
}

/// One unit of work handed from a producer thread to the worker pool.
/// `fifo_cnt` is assigned by the queue at enqueue time and strictly
/// increases across successful enqueues.
#[derive(Debug, Clone)]
pub struct Job {
    pub content: JobContent,
    pub fifo_cnt: i64,
}

impl Job {
    #[must_use]
    pub fn new(content: JobContent) -> Self {
        Self { content, fifo_cnt: 0 }
    }
}
