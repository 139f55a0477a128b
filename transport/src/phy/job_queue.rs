//! Two MPMC [`Job`] queue backends with an identical contract.
//!
//! Grounded on the original's `job_queue_naive_t` and `job_queue_mc_t`
//! (moodycamel-backed). The concurrent backend here swaps moodycamel for
//! `crossbeam-queue`'s `ArrayQueue`, guarding assignment of `fifo_cnt` with
//! a mutex exactly like the original guards its producer token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

use super::job::Job;

pub const JOB_QUEUE_WAIT_TIMEOUT: Duration = Duration::from_millis(100);
pub const JOB_QUEUE_MIN_CAPACITY: u32 = 32;

/// Contract shared by both backends.
pub trait JobQueue: Send + Sync {
    fn id(&self) -> u32;
    fn capacity(&self) -> u32;

    /// While impermeable, [`Self::enqueue_nto`] succeeds without storing
    /// anything — lets producers start before consumers are ready.
    fn set_permeable(&self);
    fn set_impermeable(&self);

    /// Never blocks. Returns `false` only when the queue is permeable, full,
    /// and the build's admission policy is discard rather than fatal; the
    /// default policy is for callers to treat `false` as a programmer error.
    fn enqueue_nto(&self, job: Job) -> bool;

    /// Blocks up to [`JOB_QUEUE_WAIT_TIMEOUT`] for a job to become available.
    fn wait_for_new_job_to(&self) -> Option<Job>;
}

struct NaiveInner {
    slots: Vec<Option<Job>>,
    enqueue_ptr: usize,
    dequeue_ptr: usize,
    fifo_cnt: i64,
    used: u32,
}

impl NaiveInner {
    fn get_free(&self, capacity: u32) -> u32 {
        capacity - 1 - self.used
    }
}

/// Single mutex, ring-buffer slots, condition-variable signaling.
pub struct JobQueueNaive {
    id: u32,
    capacity: u32,
    permeable: AtomicBool,
    inner: Mutex<NaiveInner>,
    cv: Condvar,
}

impl JobQueueNaive {
    #[must_use]
    pub fn new(id: u32, capacity: u32) -> Self {
        let slots = (0..capacity).map(|_| None).collect();
        Self {
            id,
            capacity,
            permeable: AtomicBool::new(false),
            inner: Mutex::new(NaiveInner {
                slots,
                enqueue_ptr: 0,
                dequeue_ptr: 0,
                fifo_cnt: 0,
                used: 0,
            }),
            cv: Condvar::new(),
        }
    }
}

impl JobQueue for JobQueueNaive {
    fn id(&self) -> u32 {
        self.id
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn set_permeable(&self) {
        self.permeable.store(true, Ordering::Release);
    }

    fn set_impermeable(&self) {
        self.permeable.store(false, Ordering::Release);
    }

    fn enqueue_nto(&self, mut job: Job) -> bool {
        if !self.permeable.load(Ordering::Acquire) {
            return true;
        }

        let enqueued = {
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if inner.get_free(self.capacity) == 0 {
                false
            } else {
                job.fifo_cnt = inner.fifo_cnt;
                inner.fifo_cnt += 1;
                tracing::trace!(id = self.id, fifo_cnt = job.fifo_cnt, kind = %job.content, "job enqueued");
                let ptr = inner.enqueue_ptr;
                inner.slots[ptr] = Some(job);
                inner.enqueue_ptr = (ptr + 1) % self.capacity as usize;
                inner.used += 1;
                true
            }
        };

        if enqueued {
            self.cv.notify_all();
        }
        enqueued
    }

    fn wait_for_new_job_to(&self) -> Option<Job> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if inner.used > 0 {
                let ptr = inner.dequeue_ptr;
                let job = inner.slots[ptr].take();
                inner.dequeue_ptr = (ptr + 1) % self.capacity as usize;
                inner.used -= 1;
                return job;
            }
            let (guard, timeout) = self
                .cv
                .wait_timeout(inner, JOB_QUEUE_WAIT_TIMEOUT)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            inner = guard;
            if timeout.timed_out() && inner.used == 0 {
                return None;
            }
        }
    }
}

/// Lock-free MPMC ring behind a single producer-token-equivalent mutex, to
/// keep dequeue order identical to enqueue order across many producers.
pub struct JobQueueConcurrent {
    id: u32,
    capacity: u32,
    permeable: AtomicBool,
    queue: ArrayQueue<Job>,
    producer_lock: Mutex<i64>,
    notify_mutex: Mutex<()>,
    cv: Condvar,
}

impl JobQueueConcurrent {
    /// # Panics
    ///
    /// Panics if `capacity < 32`, mirroring the original's minimum for the
    /// moodycamel-backed queue.
    #[must_use]
    pub fn new(id: u32, capacity: u32) -> Self {
        assert!(
            capacity >= JOB_QUEUE_MIN_CAPACITY,
            "concurrent job queue capacity must be at least {JOB_QUEUE_MIN_CAPACITY}"
        );
        Self {
            id,
            capacity,
            permeable: AtomicBool::new(false),
            queue: ArrayQueue::new(capacity as usize * 6),
            producer_lock: Mutex::new(0),
            notify_mutex: Mutex::new(()),
            cv: Condvar::new(),
        }
    }
}

impl JobQueue for JobQueueConcurrent {
    fn id(&self) -> u32 {
        self.id
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn set_permeable(&self) {
        self.permeable.store(true, Ordering::Release);
    }

    fn set_impermeable(&self) {
        self.permeable.store(false, Ordering::Release);
    }

    fn enqueue_nto(&self, mut job: Job) -> bool {
        if !self.permeable.load(Ordering::Acquire) {
            return true;
        }

        let enqueued = {
            let mut fifo_cnt = self
                .producer_lock
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            job.fifo_cnt = *fifo_cnt;
            match self.queue.push(job) {
                Ok(()) => {
                    *fifo_cnt += 1;
                    true
                }
                Err(_job) => false,
            }
        };

        if enqueued {
            let _guard = self
                .notify_mutex
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            self.cv.notify_all();
        }
        enqueued
    }

    fn wait_for_new_job_to(&self) -> Option<Job> {
        if let Some(job) = self.queue.pop() {
            return Some(job);
        }
        let deadline = Instant::now() + JOB_QUEUE_WAIT_TIMEOUT;
        loop {
            if let Some(job) = self.queue.pop() {
                return Some(job);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.queue.pop();
            }
            let guard = self
                .notify_mutex
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let _ = self
                .cv
                .wait_timeout(guard, remaining)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}
