//! Lock backends selectable per component, with an identical contract.
//!
//! The original picks between a pthread spinlock and an atomic spinlock via
//! a compile-time `#define`. Here the choice is a type parameter: any
//! `Guard` implementing [`LockBackend`] can back a shared value, and
//! components generic over `L: LockBackend` are exercised against both
//! backends in tests. [`SpinLock`] is Rigtorp-style (relaxed load,
//! acquire-ordered compare-exchange); [`MutexBackend`] wraps
//! `std::sync::Mutex`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A lock backend guarding a value of type `T`.
///
/// Both backends give the same blocking/non-blocking/unlock contract so
/// components can be generic over `L: LockBackend<T>` and be exercised
/// against either backend in tests.
pub trait LockBackend<T> {
    type Guard<'a>: std::ops::DerefMut<Target = T>
    where
        Self: 'a,
        T: 'a;

    fn new(value: T) -> Self;
    fn lock(&self) -> Self::Guard<'_>;
    fn try_lock(&self) -> Option<Self::Guard<'_>>;
}

/// `std::sync::Mutex`-backed lock.
#[derive(Debug, Default)]
pub struct MutexBackend<T> {
    inner: Mutex<T>,
}

impl<T> LockBackend<T> for MutexBackend<T> {
    type Guard<'a>
        = std::sync::MutexGuard<'a, T>
    where
        T: 'a;

    fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn try_lock(&self) -> Option<Self::Guard<'_>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::WouldBlock) => None,
            Err(std::sync::TryLockError::Poisoned(guard)) => Some(guard.into_inner()),
        }
    }
}

/// Rigtorp-style spinlock: <https://rigtorp.se/spinlock/>.
///
/// `lock` spins on a relaxed load until it observes the lock free, then
/// attempts an acquire-ordered compare-exchange; this avoids hammering the
/// cache line with exchange traffic while contended.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: std::cell::UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    owner: &'a SpinLock<T>,
}

impl<T> std::ops::Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.owner.value.get() }
    }
}

impl<T> std::ops::DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.owner.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.locked.store(false, Ordering::Release);
    }
}

impl<T> LockBackend<T> for SpinLock<T> {
    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        T: 'a;

    fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: std::cell::UnsafeCell::new(value),
        }
    }

    fn lock(&self) -> Self::Guard<'_> {
        loop {
            if !self.locked.swap(true, Ordering::Acquire) {
                return SpinLockGuard { owner: self };
            }
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> Option<Self::Guard<'_>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinLockGuard { owner: self })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn excludes_concurrent_access<L: LockBackend<u64> + Send + Sync + 'static>() {
        let guarded = Arc::new(L::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let g = Arc::clone(&guarded);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *g.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*guarded.lock(), 8000);
    }

    #[test]
    fn spinlock_excludes_concurrent_access() {
        excludes_concurrent_access::<SpinLock<u64>>();
    }

    #[test]
    fn mutex_backend_excludes_concurrent_access() {
        excludes_concurrent_access::<MutexBackend<u64>>();
    }

    #[test]
    fn spinlock_try_lock_fails_while_held() {
        let guarded: SpinLock<u64> = SpinLock::new(0);
        let first = guarded.lock();
        assert!(guarded.try_lock().is_none());
        drop(first);
        assert!(guarded.try_lock().is_some());
    }

    #[test]
    fn mutex_backend_try_lock_fails_while_held() {
        let guarded: MutexBackend<u64> = MutexBackend::new(0);
        let first = guarded.lock();
        assert!(guarded.try_lock().is_none());
        drop(first);
        assert!(guarded.try_lock().is_some());
    }
}
