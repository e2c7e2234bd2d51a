use std::io::Read;

use fitalloc::{
  DEFAULT_LOG_PATH, FIRST_FIT, allocate, allocate_zeroed, free, initialize, open_log, resize,
  set_policy, shutdown, snapshot, verify_heap,
};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop` or `gdb` between the steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn main() {
  // Diagnostics (double frees, rejected unmaps, bad selectors) go through
  // the `log` facade; surface them on stderr.
  env_logger::init();

  initialize();
  open_log(DEFAULT_LOG_PATH).expect("operation log");
  set_policy(FIRST_FIT);

  println!("PID = {}, operation log at {DEFAULT_LOG_PATH}", std::process::id());

  unsafe {
    // --------------------------------------------------------------------
    // 1) Allocate 100 bytes and fill them with a recognizable pattern.
    // --------------------------------------------------------------------
    let p = allocate(100).expect("allocate 100 bytes");
    println!("\n[1] allocate(100) = {:p}", p.as_ptr());

    for i in 0..100u8 {
      p.as_ptr().add(i as usize).write(i);
    }
    println!("[1] wrote 0..99 into the block, verify_heap() = {}", verify_heap());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Zero-initialized allocation: ten 4-byte elements.
    // --------------------------------------------------------------------
    let q = allocate_zeroed(10, 4).expect("allocate_zeroed 10 x 4");
    println!("\n[2] allocate_zeroed(10, 4) = {:p}", q.as_ptr());

    let all_zero = (0..40).all(|i| q.as_ptr().add(i).read() == 0);
    println!("[2] payload reads as zero: {all_zero}");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Grow the first block. The pattern written in step 1 must survive.
    // --------------------------------------------------------------------
    let r = resize(p.as_ptr(), 200).expect("resize to 200 bytes");
    println!("\n[3] resize({:p}, 200) = {:p}", p.as_ptr(), r.as_ptr());

    let preserved = (0..100u8).all(|i| r.as_ptr().add(i as usize).read() == i);
    println!("[3] first 100 bytes preserved: {preserved}");
    println!("[3] verify_heap() = {}", verify_heap());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Usage report before tearing anything down.
    // --------------------------------------------------------------------
    println!("\n[4] snapshot:");
    snapshot(true);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Give everything back, releasing trailing mappings to the OS.
    // --------------------------------------------------------------------
    free(r.as_ptr(), true);
    free(q.as_ptr(), true);
    println!("\n[5] freed both blocks, verify_heap() = {}", verify_heap());

    // A second free of the same pointer is reported and ignored; run with
    // RUST_LOG=warn to see the diagnostic.
    free(q.as_ptr(), true);
  }

  shutdown();
  println!("\n[6] End of demo. Remaining mappings return to the OS on exit.");
}
