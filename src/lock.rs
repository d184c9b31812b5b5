//! The global lock guarding every pool, the size-class table, the
//! `pool_min_index`/`pool_max_index` hints, `block_last`, and every field of
//! every block header. Two backends are available, selected by the
//! `spin-lock` feature: a blocking mutex (default) and a busy-waiting
//! spinlock with explicit memory barriers.

#[cfg(not(feature = "spin-lock"))]
pub use blocking::Lock;

#[cfg(feature = "spin-lock")]
pub use spin::Lock;

#[cfg(not(feature = "spin-lock"))]
mod blocking {
  use std::sync::{Mutex, MutexGuard};

  /// Blocking mutex backend. Acquisition may suspend the calling thread;
  /// fair scheduling across waiters is not required.
  #[derive(Default)]
  pub struct Lock(Mutex<()>);

  impl Lock {
    pub const fn new() -> Self {
      Self(Mutex::new(()))
    }

    /// Blocks until the lock is free, then holds it until the returned
    /// guard is dropped.
    pub fn acquire(&self) -> LockGuard<'_> {
      LockGuard(match self.0.lock() {
        Ok(guard) => guard,
        // A prior holder panicked while mutating allocator state. There is
        // no way to recover a consistent heap, so we carry the poison
        // forward rather than silently accepting corrupted metadata.
        Err(poisoned) => poisoned.into_inner(),
      })
    }
  }

  pub struct LockGuard<'a>(MutexGuard<'a, ()>);
}

#[cfg(feature = "spin-lock")]
mod spin {
  use std::sync::atomic::{AtomicBool, Ordering};

  /// Spinlock backend: test-and-set with a full memory barrier on both
  /// acquire and release. Suitable where blocking the thread is
  /// undesirable; unsuitable where the critical section is long, since
  /// waiters busy-wait for its entire duration.
  pub struct Lock(AtomicBool);

  impl Lock {
    pub const fn new() -> Self {
      Self(AtomicBool::new(false))
    }

    pub fn acquire(&self) -> LockGuard<'_> {
      while self
        .0
        .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
      {
        std::hint::spin_loop();
      }
      LockGuard(&self.0)
    }
  }

  impl Default for Lock {
    fn default() -> Self {
      Self::new()
    }
  }

  pub struct LockGuard<'a>(&'a AtomicBool);

  impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
      self.0.store(false, Ordering::Release);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn lock_serialises_concurrent_increments() {
    let lock = Arc::new(Lock::new());
    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let lock = Arc::clone(&lock);
        let counter = Arc::clone(&counter);
        thread::spawn(move || {
          for _ in 0..1000 {
            let _guard = lock.acquire();
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
          }
        })
      })
      .collect();

    for h in handles {
      h.join().unwrap();
    }

    assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 8000);
  }
}
