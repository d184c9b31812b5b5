use std::io::Read;

use gpalloc::{Allocator, DefaultProvider};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

#[cfg(feature = "sbrk")]
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { libc::sbrk(0) },
  );
}

#[cfg(not(feature = "sbrk"))]
fn print_program_break(label: &str) {
  println!("[{}] PID = {} (mapping backend, no single program break to report)", label, std::process::id());
}

fn main() {
  env_logger::init();

  // Our heap allocator: a segregated free-list index over a physical
  // block chain, fronted by a single global lock.
  let heap: Allocator<DefaultProvider> = Allocator::new(DefaultProvider);

  print_program_break("start");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 4 bytes, write through it, release it.
  // --------------------------------------------------------------------
  let first = heap.allocate(4);
  println!("\n[1] allocate(4) -> {:?}", first);
  unsafe { (first as *mut u32).write(0xDEADBEEF) };
  println!("[1] value written = 0x{:X}", unsafe { (first as *mut u32).read() });
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 12 bytes alongside it.
  // --------------------------------------------------------------------
  let second = heap.allocate(12);
  println!("\n[2] allocate(12) -> {:?}", second);
  print_program_break("after 2 allocations");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Release the first block, then request something smaller: this
  //    should be served out of the freed block rather than growing the
  //    heap further.
  // --------------------------------------------------------------------
  heap.release(first);
  println!("\n[3] released first block");
  let third = heap.allocate(2);
  println!("[3] allocate(2) -> {:?} (reused={})", third, third == first);
  print_program_break("after reuse");
  block_until_enter_pressed();

  heap.release(second);
  heap.release(third);
  println!("\n[4] released remaining blocks");
  print_program_break("end");
}
