//! Job dispatch: the tagged-union work item and its two queue backends.

pub mod job;
pub mod job_queue;
