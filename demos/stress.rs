//! Non-interactive allocate/release stress loop, modeled on the original
//! allocator's own throughput benchmark: a million iterations of a
//! random-sized allocate immediately followed by its release, reporting
//! elapsed time and, under the `sbrk` backend, whether the program break
//! returned to where it started.

use std::time::Instant;

use gpalloc::{Allocator, DefaultProvider};

const STEPS: usize = 1_000_000;
const SIZE_ALLOC_MIN: usize = 1;
const SIZE_ALLOC_MAX: usize = 4096;
const SEED: u64 = 1234;

/// Small xorshift64 PRNG so this demo needs no extra dependency just to
/// pick a bounded random size each iteration.
struct Xorshift64(u64);

impl Xorshift64 {
  fn next(&mut self) -> u64 {
    let mut x = self.0;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    self.0 = x;
    x
  }

  fn range(&mut self, lo: usize, hi: usize) -> usize {
    lo + (self.next() as usize % (hi - lo + 1))
  }
}

fn main() {
  env_logger::init();

  let heap: Allocator<DefaultProvider> = Allocator::new(DefaultProvider);
  let mut rng = Xorshift64(SEED);

  #[cfg(feature = "sbrk")]
  let break_start = unsafe { libc::sbrk(0) } as usize;

  let started = Instant::now();
  for _ in 0..STEPS {
    let size = rng.range(SIZE_ALLOC_MIN, SIZE_ALLOC_MAX);
    let p = heap.allocate(size);
    assert!(!p.is_null(), "allocate({size}) unexpectedly failed");
    unsafe { p.write_bytes(0xAA, 1) };
    heap.release(p);
  }
  let elapsed = started.elapsed();

  println!("{STEPS} allocate/release pairs in {:.3}s ({:.0} pairs/sec)", elapsed.as_secs_f64(), STEPS as f64 / elapsed.as_secs_f64());

  #[cfg(feature = "sbrk")]
  {
    let break_end = unsafe { libc::sbrk(0) } as usize;
    println!("program break delta = {} bytes", break_end as isize - break_start as isize);
  }
}
