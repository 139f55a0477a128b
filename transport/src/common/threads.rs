//! Named, real-time-scheduled thread spawning.
//!
//! Mirrors `threads_new_rt_mask_custom`: `prio_offset` in `[0, 99]` sets
//! `SCHED_FIFO` priority `99 - prio_offset` (0 = max); `cpu_core >= 0` pins
//! affinity. Debug builds override both to "let the OS decide" so a
//! misconfigured real-time thread can't starve the host while iterating.

use std::io;
use std::thread::{self, JoinHandle};

use crate::config::ThreadCorePrioConfig;

/// Spawns a named OS thread, applying real-time scheduling hints on Linux.
///
/// In debug builds the scheduling hints are ignored regardless of what
/// `config` requests, matching the original's `#ifdef NDEBUG` override.
///
/// # Errors
///
/// Returns the underlying [`std::io::Error`] if [`std::thread::Builder::spawn`] fails.
pub fn spawn_rt<F, T>(name: &str, config: ThreadCorePrioConfig, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = thread::Builder::new().name(name.to_string()).spawn(f)?;
    apply_scheduling(&handle, effective_config(config));
    Ok(handle)
}

#[cfg(debug_assertions)]
fn effective_config(_config: ThreadCorePrioConfig) -> ThreadCorePrioConfig {
    tracing::warn!("debug build detected, overwriting prio_offset and cpu_core to -1");
    ThreadCorePrioConfig::default()
}

#[cfg(not(debug_assertions))]
fn effective_config(config: ThreadCorePrioConfig) -> ThreadCorePrioConfig {
    config
}

#[cfg(all(target_os = "linux", not(debug_assertions)))]
fn apply_scheduling<T>(handle: &JoinHandle<T>, config: ThreadCorePrioConfig) {
    use std::os::unix::thread::JoinHandleExt;

    let tid = handle.as_pthread_t();

    if config.prio_offset >= 0 {
        unsafe {
            let max_prio = libc::sched_get_priority_max(libc::SCHED_FIFO);
            let prio = (max_prio - config.prio_offset).max(libc::sched_get_priority_min(libc::SCHED_FIFO));
            let param = libc::sched_param {
                sched_priority: prio,
            };
            let rc = libc::pthread_setschedparam(tid, libc::SCHED_FIFO, &param);
            if rc != 0 {
                tracing::warn!(rc, "pthread_setschedparam failed, continuing with default scheduling");
            }
        }
    }

    if config.cpu_core >= 0 {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(config.cpu_core as usize, &mut set);
            let rc = libc::pthread_setaffinity_np(tid, std::mem::size_of::<libc::cpu_set_t>(), &set);
            if rc != 0 {
                tracing::warn!(rc, "pthread_setaffinity_np failed, continuing without pinning");
            }
        }
    }
}

#[cfg(any(not(target_os = "linux"), debug_assertions))]
fn apply_scheduling<T>(_handle: &JoinHandle<T>, _config: ThreadCorePrioConfig) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_rt_runs_closure_and_joins() {
        let handle = spawn_rt("test-worker", ThreadCorePrioConfig::default(), || 42).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn debug_build_overrides_to_default_config() {
        let cfg = effective_config(ThreadCorePrioConfig {
            prio_offset: 10,
            cpu_core: 2,
        });
        if cfg!(debug_assertions) {
            assert_eq!(cfg, ThreadCorePrioConfig::default());
        }
    }
}
