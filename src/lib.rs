//! # gpalloc - A Segregated Free-List Heap Allocator
//!
//! This crate provides a general-purpose allocator built around a
//! size-segregated, sorted free-list index over a single physical block
//! chain — the strategy behind most production `malloc` implementations,
//! scaled down to something you can read in one sitting.
//!
//! ## Overview
//!
//! ```text
//!   Physical block chain (address order, one OS region's worth):
//!
//!   ┌────────┬─────────┬────────┬─────────┬────────┬─────────────────┐
//!   │ Header │ Payload │ Header │ Payload │ Header │     Payload     │
//!   │  (A)   │  in-use │  (B)   │  free   │  (C)   │     in-use      │
//!   └────────┴─────────┴────────┴─────────┴────────┴─────────────────┘
//!        ▲ block_prev/block_next thread every header in address order,
//!          in-use or free alike.
//!
//!   Free blocks are additionally indexed by size class:
//!
//!   Table
//!   ├── bucket[0]   (payload  1 byte)   → pool (sorted, ascending)
//!   ├── bucket[1]   (payload  2 bytes)  → pool
//!   ├── ...
//!   ├── bucket[N-1] (payload  N bytes)  → pool
//!   └── bucket[N]   (payload  > N)      → overflow pool
//! ```
//!
//! `allocate` first asks the table for a free block of sufficient size; on
//! a miss it asks the page provider for a fresh OS region. `release` marks
//! a block free, coalesces it with any free physical neighbour, and —
//! unless that leaves it as the sole occupant of its OS region, in which
//! case the region is handed straight back to the OS — reinserts it into
//! the table.
//!
//! ## Crate Structure
//!
//! ```text
//!   gpalloc
//!   ├── align      - Alignment macros (align!, align_up!)
//!   ├── block      - Block header layout (internal)
//!   ├── page       - OS page provider (sbrk / mmap backends)
//!   ├── lock       - Global lock (blocking mutex / spinlock backends)
//!   ├── pool       - Size-class index: Pool and Table
//!   └── allocator  - Allocator front-end and GlobalAlloc impl
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gpalloc::{Allocator, DefaultProvider};
//!
//! #[global_allocator]
//! static ALLOCATOR: Allocator<DefaultProvider> = Allocator::new(DefaultProvider);
//!
//! fn main() {
//!     let v: Vec<u64> = (0..16).collect();
//!     println!("{:?}", v);
//! }
//! ```
//!
//! Or drive it directly without installing it globally:
//!
//! ```rust
//! use gpalloc::{Allocator, DefaultProvider};
//!
//! let heap = Allocator::<DefaultProvider>::new(DefaultProvider);
//! let p = heap.allocate(64);
//! assert!(!p.is_null());
//! heap.release(p);
//! ```
//!
//! ## Build-time configuration
//!
//! - `sbrk` (default): page provider backed by `sbrk(2)`, one growing
//!   region, deallocation only at the topmost edge.
//! - disabling `sbrk`: page provider backed by `mmap(2)`/`munmap(2)`,
//!   independent regions, deallocation of any region once it is wholly
//!   free.
//! - `spin-lock`: swaps the default blocking `Mutex` for a busy-waiting
//!   spinlock.
//!
//! ## Limitations
//!
//! - **No alignment beyond the page provider's**: this allocator does not
//!   honor `Layout::align()` beyond whatever the underlying OS call
//!   happens to return aligned to.
//! - **`sbrk` release is LIFO-only**: only the topmost region may be
//!   returned to the OS; this falls directly out of how `sbrk` works and
//!   is not something this crate works around.
//! - **Overflow-bucket search is a hint, not exhaustive**: a request that
//!   misses its own bucket only ever retries the single largest-known
//!   bucket, so it can occasionally fail to find a smaller intermediate
//!   free block and fall through to requesting fresh pages instead.

pub mod align;
mod allocator;
mod block;
mod lock;
mod page;
mod pool;

pub use allocator::{Allocator, DefaultProvider};

/// Serializes any `#[test]` that reads or moves the real process program
/// break. Cargo runs unit tests from different modules in parallel
/// threads of the same process, and the `sbrk` backend's tests would
/// otherwise race each other through that single shared piece of OS
/// state.
#[cfg(all(test, feature = "sbrk"))]
pub(crate) static SBRK_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
pub use page::{PageError, PageProvider};
