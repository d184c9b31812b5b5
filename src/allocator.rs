//! Allocator front-end: the `allocate`/`release` entry points that tie the
//! page provider, the physical block chain, and the size-class pool index
//! together. Every mutation of allocator state happens under the single
//! global lock in [`crate::lock`], acquired on entry and held across the
//! whole operation — including the call into the page provider.

use std::alloc::{GlobalAlloc, Layout};
use std::cell::UnsafeCell;
use std::ptr;

use log::{debug, trace, warn};

use crate::block::{Block, HEADER_SIZE};
use crate::lock::Lock;
use crate::page::PageProvider;
use crate::pool::{Table, TABLE_SIZE};

#[cfg(feature = "sbrk")]
pub use crate::page::SbrkProvider as DefaultProvider;
#[cfg(not(feature = "sbrk"))]
pub use crate::page::MmapProvider as DefaultProvider;

struct Inner<P> {
  /// `None` until the first `allocate`/`release` call — the one-shot
  /// initialisation latch. Because it is only ever read or written while
  /// the caller holds `Allocator::lock`, the lock itself is the
  /// synchronisation primitive the spec describes as a separate static
  /// latch; a second lock here would only serialise against itself.
  table: Option<Table>,
  table_size: usize,
  /// Highest-address block currently owned by the allocator. Meaningful
  /// only under the `sbrk` backend, where every acquired region is
  /// physically contiguous with the last; the mapping backend never
  /// threads blocks across independent regions, so it never reads this.
  #[cfg_attr(not(feature = "sbrk"), allow(dead_code))]
  block_last: *mut Block,
  provider: P,
}

/// Segregated free-list heap allocator.
///
/// Generic over its [`PageProvider`] so tests can inject an isolated
/// backend; production code uses the default alias, which resolves to the
/// `sbrk`-based or `mmap`-based provider depending on the `sbrk` feature.
pub struct Allocator<P: PageProvider = DefaultProvider> {
  lock: Lock,
  inner: UnsafeCell<Inner<P>>,
}

// SAFETY: all shared state lives inside `inner`, and every access to it
// happens while `lock` is held.
unsafe impl<P: PageProvider> Sync for Allocator<P> {}
unsafe impl<P: PageProvider> Send for Allocator<P> {}

impl<P: PageProvider> Allocator<P> {
  /// Builds an allocator over `provider` with the default `TABLE_SIZE`
  /// bucket count. No memory is touched until the first `allocate` or
  /// `release` call.
  pub const fn new(provider: P) -> Self {
    Self::with_table_size(provider, TABLE_SIZE)
  }

  /// As [`Allocator::new`], with a non-default size-class bucket count.
  pub const fn with_table_size(provider: P, table_size: usize) -> Self {
    Self {
      lock: Lock::new(),
      inner: UnsafeCell::new(Inner {
        table: None,
        table_size,
        block_last: ptr::null_mut(),
        provider,
      }),
    }
  }

  fn ensure_init(&self, inner: &mut Inner<P>) {
    if inner.table.is_none() {
      debug!("allocator one-shot initialisation ({} buckets)", inner.table_size);
      inner.table = Some(Table::new(inner.table_size));
      inner.block_last = ptr::null_mut();
    }
  }

  /// Returns a pointer to at least `size` usable bytes, or null if `size`
  /// is zero or the page provider cannot satisfy the request.
  pub fn allocate(&self, size: usize) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let _guard = self.lock.acquire();
    let inner = unsafe { &mut *self.inner.get() };
    self.ensure_init(inner);

    let candidate = inner.table.as_ref().unwrap().search(size);

    let block = if candidate.is_null() {
      match self.block_create(inner, size) {
        Some(b) => b,
        None => return ptr::null_mut(),
      }
    } else {
      unsafe { inner.table.as_mut().unwrap().remove(candidate) };
      let payload = unsafe { (*candidate).payload() };
      if size + HEADER_SIZE + 1 > payload {
        unsafe { (*candidate).set_in_use(true) };
        candidate
      } else {
        self.block_split(inner, size, candidate)
      }
    };

    Block::payload_addr(block)
  }

  /// Releases a pointer previously returned by `allocate`. Null is a
  /// no-op; a pointer whose header is not currently in-use is also a
  /// no-op, indistinguishable from an idempotent repeat release.
  pub fn release(&self, address: *mut u8) {
    if address.is_null() {
      return;
    }

    let _guard = self.lock.acquire();
    let inner = unsafe { &mut *self.inner.get() };
    self.ensure_init(inner);

    let block = unsafe { Block::from_payload(address) };
    if unsafe { !(*block).in_use() } {
      return;
    }

    unsafe { (*block).set_in_use(false) };

    #[cfg(feature = "sbrk")]
    let is_edge = block == inner.block_last;
    #[cfg(not(feature = "sbrk"))]
    let is_edge = unsafe { (*block).block_prev.is_null() && (*block).block_next.is_null() };

    if is_edge {
      self.block_remove(inner, block);
      return;
    }

    let survivor = self.block_join(inner, block);
    unsafe { inner.table.as_mut().unwrap().insert(survivor) };
  }

  /// Acquires a fresh block of exactly `size` usable bytes from the page
  /// provider, marking it in-use and — under the `sbrk` backend — wiring
  /// it onto the tail of the physical chain.
  fn block_create(&self, inner: &mut Inner<P>, size: usize) -> Option<*mut Block> {
    let requested = HEADER_SIZE + size;
    let (addr, acquired) = match inner.provider.acquire(requested) {
      Ok(v) => v,
      Err(e) => {
        warn!("page provider denied block_create({size}): {e}");
        return None;
      }
    };

    let block = addr as *mut Block;
    let payload = acquired - HEADER_SIZE;
    unsafe { Block::init(block, payload) };

    #[cfg(not(feature = "sbrk"))]
    unsafe {
      (*block).region_len = acquired;
    }

    #[cfg(feature = "sbrk")]
    unsafe {
      (*block).block_prev = inner.block_last;
      if !inner.block_last.is_null() {
        (*inner.block_last).block_next = block;
      }
      inner.block_last = block;
    }

    trace!("block_create: {:?} payload={}", block, payload);
    Some(block)
  }

  /// Hands a block back to the page provider. Under `sbrk`, rewinds
  /// `block_last` to the block's physical predecessor; under mapping,
  /// releases the region's originally-acquired extent verbatim.
  fn block_remove(&self, inner: &mut Inner<P>, block: *mut Block) {
    trace!("block_remove: {:?}", block);

    #[cfg(feature = "sbrk")]
    {
      inner.block_last = unsafe { (*block).block_prev };
      if !inner.block_last.is_null() {
        unsafe { (*inner.block_last).block_next = ptr::null_mut() };
      }
      let len = HEADER_SIZE + unsafe { (*block).payload() };
      if inner.provider.release(block as *mut u8, len).is_err() {
        warn!("page provider failed to release block {:?}", block);
      }
    }

    #[cfg(not(feature = "sbrk"))]
    {
      let len = unsafe { (*block).region_len };
      if inner.provider.release(block as *mut u8, len).is_err() {
        warn!("page provider failed to release block {:?}", block);
      }
    }
  }

  /// Shrinks `b` to exactly `size` bytes, carves a free tail off the
  /// remainder, stitches it into the physical chain, and inserts it into
  /// its pool. `b` must not currently be a member of any pool.
  fn block_split(&self, inner: &mut Inner<P>, size: usize, b: *mut Block) -> *mut Block {
    unsafe {
      let payload = (*b).payload();
      debug_assert!(size < payload);
      debug_assert!(size + HEADER_SIZE + 1 <= payload);

      let tail = ((b as usize) + HEADER_SIZE + size) as *mut Block;
      let tail_payload = payload - (size + HEADER_SIZE);
      Block::init(tail, tail_payload);
      (*tail).set_in_use(false);

      (*tail).block_prev = b;
      (*tail).block_next = (*b).block_next;
      if !(*b).block_next.is_null() {
        (*(*b).block_next).block_prev = tail;
      }

      #[cfg(feature = "sbrk")]
      if inner.block_last == b {
        inner.block_last = tail;
      }

      (*b).block_next = tail;
      (*b).set_payload(size);
      (*b).set_in_use(true);

      inner.table.as_mut().unwrap().insert(tail);

      debug_assert_eq!((*b).block_next, tail, "split head must point at its new tail");
      debug_assert_eq!((*tail).block_prev, b, "split tail must point back at its head");
      debug_assert!((*b).in_use() && !(*tail).in_use());

      trace!("block_split: head={:?} size={} tail={:?} tail_payload={}", b, size, tail, tail_payload);

      b
    }
  }

  /// Coalesces `block` with any free physical neighbours. Absorbing a
  /// neighbour with payload `p` grows the surviving block by
  /// `header_size + p`. When the left neighbour is free, it — not
  /// `block` — is the surviving pointer, since it is the one already
  /// registered (and must be re-registered) in a pool.
  fn block_join(&self, inner: &mut Inner<P>, block: *mut Block) -> *mut Block {
    unsafe {
      let mut survivor = block;

      let right = (*survivor).block_next;
      if !right.is_null() && !(*right).in_use() {
        inner.table.as_mut().unwrap().remove(right);
        let absorbed = (*survivor).payload() + HEADER_SIZE + (*right).payload();
        (*survivor).set_payload(absorbed);
        (*survivor).block_next = (*right).block_next;
        if !(*survivor).block_next.is_null() {
          (*(*survivor).block_next).block_prev = survivor;
        }
        #[cfg(feature = "sbrk")]
        if inner.block_last == right {
          inner.block_last = survivor;
        }
      }

      let left = (*survivor).block_prev;
      if !left.is_null() && !(*left).in_use() {
        inner.table.as_mut().unwrap().remove(left);
        let absorbed = (*left).payload() + HEADER_SIZE + (*survivor).payload();
        (*left).set_payload(absorbed);
        (*left).block_next = (*survivor).block_next;
        if !(*left).block_next.is_null() {
          (*(*left).block_next).block_prev = left;
        }
        #[cfg(feature = "sbrk")]
        if inner.block_last == survivor {
          inner.block_last = left;
        }
        survivor = left;
      }

      debug_assert!(
        (*survivor).block_next.is_null() || (*(*survivor).block_next).in_use(),
        "block_join must leave no free right neighbour"
      );
      debug_assert!(
        (*survivor).block_prev.is_null() || (*(*survivor).block_prev).in_use(),
        "block_join must leave no free left neighbour"
      );

      trace!("block_join: survivor={:?} payload={}", survivor, (*survivor).payload());
      survivor
    }
  }
}

/// Installs this allocator as the process's `#[global_allocator]`.
///
/// Non-goal per the design: no alignment guarantees beyond whatever the
/// page provider's return address happens to satisfy, so this should not
/// back allocations with over-aligned requirements (e.g. SIMD types).
unsafe impl<P: PageProvider> GlobalAlloc for Allocator<P> {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    self.allocate(layout.size())
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    self.release(ptr)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex as StdMutex;

  /// In-process page provider so tests don't fight over the real
  /// program break or real mappings. Backed by a plain `Vec<u8>` arena;
  /// `release` is a no-op (fine — tests only assert on allocator-level
  /// bookkeeping, not OS reclamation).
  struct TestProvider {
    arena: StdMutex<Vec<Box<[u8]>>>,
  }

  impl TestProvider {
    fn new() -> Self {
      Self { arena: StdMutex::new(Vec::new()) }
    }
  }

  impl PageProvider for TestProvider {
    fn page_size(&self) -> usize {
      4096
    }

    fn acquire(&self, n_bytes: usize) -> Result<(*mut u8, usize), crate::page::PageError> {
      let mut buf = vec![0u8; n_bytes].into_boxed_slice();
      let ptr = buf.as_mut_ptr();
      self.arena.lock().unwrap().push(buf);
      Ok((ptr, n_bytes))
    }

    fn release(&self, _addr: *mut u8, _n_bytes: usize) -> Result<(), crate::page::PageError> {
      Ok(())
    }
  }

  fn fresh() -> Allocator<TestProvider> {
    Allocator::with_table_size(TestProvider::new(), 64)
  }

  #[test]
  fn allocate_zero_returns_null() {
    let a = fresh();
    assert!(a.allocate(0).is_null());
  }

  #[test]
  fn release_null_is_noop() {
    let a = fresh();
    a.release(ptr::null_mut());
    a.release(ptr::null_mut());
  }

  #[test]
  fn basic_allocate_and_release_roundtrip() {
    let a = fresh();
    let p = a.allocate(32);
    assert!(!p.is_null());
    unsafe {
      p.write_bytes(0xAB, 32);
    }
    a.release(p);
  }

  #[test]
  fn exact_fit_is_returned_without_split_s_boundary() {
    let a = fresh();
    let p1 = a.allocate(100);
    // A trailing bystander keeps p1 from being the edge of the chain, so
    // releasing it reinserts it into its pool instead of handing it
    // straight back to the page provider.
    let _bystander = a.allocate(8);
    a.release(p1);

    // Same size again must reuse the freed block whole (no split, since
    // size + header + 1 > payload for an exact-size candidate).
    let p2 = a.allocate(100);
    assert_eq!(p1, p2);
  }

  #[test]
  fn double_release_is_a_silent_noop_s6() {
    let a = fresh();
    let p = a.allocate(16);
    a.release(p);
    // Second release targets a block whose in-use bit is already clear.
    a.release(p);
  }

  #[test]
  fn split_reuses_tail_of_freed_block_s2() {
    let a = fresh();
    let _a1 = a.allocate(100);
    let b = a.allocate(100);
    let _c = a.allocate(200);
    a.release(b);

    let d = a.allocate(50);
    assert!(!d.is_null());

    // d must land inside the region previously occupied by b's payload.
    let b_start = b as usize;
    let b_end = b_start + 100;
    assert!((d as usize) >= b_start && (d as usize) < b_end, "d should be carved from b's freed block");
  }

  #[test]
  fn releasing_adjacent_blocks_coalesces_into_one_s5() {
    let a = fresh();
    let x = a.allocate(64);
    let y = a.allocate(64);
    // Keeps y from being the edge of the chain when released below, so
    // both releases go through block_join instead of block_remove.
    let _bystander = a.allocate(8);
    a.release(x);
    a.release(y);

    // block_join always keeps the left-hand block as the surviving
    // pointer, so the coalesced entry is x's address with payload
    // exactly spanning both former payloads plus one header.
    let merged_min = 64 + HEADER_SIZE + 64;
    let z = a.allocate(merged_min);
    assert_eq!(z, x);
  }

  #[cfg(feature = "sbrk")]
  #[test]
  fn allocate_then_release_returns_break_to_start_s1() {
    let _guard = crate::SBRK_TEST_LOCK.lock().unwrap();
    let heap: Allocator<crate::page::SbrkProvider> = Allocator::new(crate::page::SbrkProvider);
    let before = unsafe { libc::sbrk(0) } as usize;

    let p = heap.allocate(1);
    assert!(!p.is_null());
    heap.release(p);

    let after = unsafe { libc::sbrk(0) } as usize;
    assert_eq!(after, before);
  }

  #[cfg(feature = "sbrk")]
  #[test]
  fn million_cycle_allocate_release_leaves_break_unchanged_s4() {
    let _guard = crate::SBRK_TEST_LOCK.lock().unwrap();
    let heap: Allocator<crate::page::SbrkProvider> = Allocator::new(crate::page::SbrkProvider);
    let before = unsafe { libc::sbrk(0) } as usize;

    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    for _ in 0..1_000_000u32 {
      state ^= state << 13;
      state ^= state >> 7;
      state ^= state << 17;
      let size = 1 + (state as usize % 32);

      let p = heap.allocate(size);
      assert!(!p.is_null());
      heap.release(p);
    }

    let after = unsafe { libc::sbrk(0) } as usize;
    assert_eq!(after, before);
  }

  #[test]
  fn allocate_never_hands_out_an_outstanding_pointer_twice() {
    let a = fresh();
    let mut live = Vec::new();
    for i in 0..64 {
      let p = a.allocate(8 + i);
      assert!(!p.is_null());
      assert!(!live.contains(&p), "allocate must not alias a live pointer");
      live.push(p);
    }
    for p in live {
      a.release(p);
    }
  }
}
