//! The page provider: the OS-facing primitive that acquires and releases
//! contiguous byte ranges. Two backends are supported, selected at build
//! time by the `sbrk` feature — everything above this module only ever
//! sees the three-operation contract in [`PageProvider`].

use std::ptr;

use libc::c_void;
use log::warn;
use thiserror::Error;

/// Failure modes visible when the page provider cannot satisfy a request.
///
/// These never reach the public `allocate`/`release` surface directly —
/// `allocate` collapses any [`PageError`] into a null return, and `release`
/// never observes one at all — but they let the allocator's internals and
/// its tests distinguish an OS-level denial from an accounting overflow.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
  #[error("OS page provider denied the request ({0} bytes)")]
  Denied(usize),
  #[error("requested size overflows the provider's page accounting")]
  Overflow,
}

/// Granularity and acquire/release contract for a raw memory backend.
pub trait PageProvider {
  /// Page granularity in bytes. Stable for the process lifetime.
  fn page_size(&self) -> usize;

  /// Returns a contiguous readable+writable region of at least `n_bytes`,
  /// and the *actual* extent acquired (rounding may make this larger than
  /// requested). Callers that need to release the exact region later
  /// should hold on to this second value rather than recomputing it.
  fn acquire(&self, n_bytes: usize) -> Result<(*mut u8, usize), PageError>;

  /// Returns a previously acquired region to the OS. `n_bytes` must be the
  /// extent reported by the matching `acquire` call.
  fn release(&self, addr: *mut u8, n_bytes: usize) -> Result<(), PageError>;
}

/// Default page size reported when the OS cannot be queried.
pub const PAGE_SIZE_DEFAULT: usize = 4096;

/// Minimum number of pages requested per mapping-backend acquisition.
pub const PAGE_MIN_ALLOC: usize = 1;

#[cfg(not(feature = "sbrk"))]
pub use mmap::MmapProvider;

#[cfg(feature = "sbrk")]
pub use sbrk::SbrkProvider;

#[cfg(not(feature = "sbrk"))]
mod mmap {
  use super::*;

  /// Anonymous-mapping backend: every acquisition is its own independent
  /// `mmap` region, rounded up to a page multiple (and to at least
  /// [`PAGE_MIN_ALLOC`] pages), released with `munmap`.
  #[derive(Debug, Default)]
  pub struct MmapProvider;

  impl PageProvider for MmapProvider {
    fn page_size(&self) -> usize {
      let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
      if size <= 0 {
        PAGE_SIZE_DEFAULT
      } else {
        size as usize
      }
    }

    fn acquire(&self, n_bytes: usize) -> Result<(*mut u8, usize), PageError> {
      let page_size = self.page_size();
      let min_bytes = PAGE_MIN_ALLOC * page_size;
      let wanted = n_bytes.max(min_bytes);
      let rounded = crate::align_up!(wanted, page_size);

      let addr = unsafe {
        libc::mmap(
          ptr::null_mut(),
          rounded,
          libc::PROT_READ | libc::PROT_WRITE,
          libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
          -1,
          0,
        )
      };

      if addr == libc::MAP_FAILED {
        warn!("mmap denied request for {} bytes", rounded);
        return Err(PageError::Denied(rounded));
      }

      Ok((addr as *mut u8, rounded))
    }

    fn release(&self, addr: *mut u8, n_bytes: usize) -> Result<(), PageError> {
      let rc = unsafe { libc::munmap(addr as *mut c_void, n_bytes) };
      if rc != 0 {
        warn!("munmap failed for {:?} ({} bytes)", addr, n_bytes);
        return Err(PageError::Denied(n_bytes));
      }
      Ok(())
    }
  }
}

#[cfg(feature = "sbrk")]
mod sbrk {
  use super::*;
  use libc::intptr_t;

  /// Program-break backend: `acquire` grows the break by exactly
  /// `n_bytes`, `release` shrinks it. Only the topmost region may ever be
  /// released — the allocator front-end enforces this by only calling
  /// `release` on the block that is currently `block_last`.
  #[derive(Debug, Default)]
  pub struct SbrkProvider;

  impl PageProvider for SbrkProvider {
    fn page_size(&self) -> usize {
      let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
      if size <= 0 {
        PAGE_SIZE_DEFAULT
      } else {
        size as usize
      }
    }

    fn acquire(&self, n_bytes: usize) -> Result<(*mut u8, usize), PageError> {
      if n_bytes > isize::MAX as usize {
        return Err(PageError::Overflow);
      }

      let addr = unsafe { libc::sbrk(n_bytes as intptr_t) };
      if addr == usize::MAX as *mut c_void {
        warn!("sbrk denied request for {} bytes", n_bytes);
        return Err(PageError::Denied(n_bytes));
      }

      Ok((addr as *mut u8, n_bytes))
    }

    fn release(&self, _addr: *mut u8, n_bytes: usize) -> Result<(), PageError> {
      if n_bytes > isize::MAX as usize {
        return Err(PageError::Overflow);
      }

      let decrement = -(n_bytes as intptr_t);
      let rc = unsafe { libc::sbrk(decrement) };
      if rc == usize::MAX as *mut c_void {
        warn!("sbrk failed to release {} bytes", n_bytes);
        return Err(PageError::Denied(n_bytes));
      }
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(feature = "sbrk")]
  #[test]
  fn sbrk_acquire_moves_the_break_forward() {
    let _guard = crate::SBRK_TEST_LOCK.lock().unwrap();
    let provider = SbrkProvider;
    let before = unsafe { libc::sbrk(0) } as usize;
    let (addr, len) = provider.acquire(64).expect("acquire should succeed");
    assert_eq!(addr as usize, before);
    assert_eq!(len, 64);
    let after = unsafe { libc::sbrk(0) } as usize;
    assert_eq!(after, before + 64);

    provider.release(addr, len).expect("release should succeed");
    let restored = unsafe { libc::sbrk(0) } as usize;
    assert_eq!(restored, before);
  }

  #[cfg(not(feature = "sbrk"))]
  #[test]
  fn mmap_acquire_rounds_up_to_a_page_multiple() {
    let provider = MmapProvider;
    let page_size = provider.page_size();
    let (addr, len) = provider.acquire(1).expect("acquire should succeed");
    assert!(!addr.is_null());
    assert_eq!(addr as usize % page_size, 0);
    assert_eq!(len, page_size);

    provider.release(addr, len).expect("release should succeed");
  }
}
