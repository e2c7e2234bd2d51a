//! Policy-comparison harness over the public facade.
//!
//! Drives a randomized allocate/free workload under each placement policy
//! and reads the statistics snapshot afterwards, plus one literal
//! end-to-end scenario with the operation log attached. Everything here
//! shares the process-wide heap, so the tests take a common lock for their
//! whole duration.

use std::ptr;
use std::sync::{Mutex, MutexGuard};

use rand::Rng;

use fitalloc::{
  BEST_FIT, FIRST_FIT, MemoryUsage, WORST_FIT, allocate, allocate_zeroed, close_log, free,
  initialize, open_log, resize, set_policy, shutdown, snapshot, verify_heap,
};

static TEST_LOCK: Mutex<()> = Mutex::new(());

fn serialized() -> MutexGuard<'static, ()> {
  let _ = env_logger::builder().is_test(true).try_init();
  TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

const NUM_ALLOCATIONS: usize = 100;
const MIN_SIZE: usize = 2;
// Small enough that reuse carved out of a coalesced multi-mapping span
// stays inside the span's first page.
const MAX_SIZE: usize = 128;

/// One policy run: random sizes, random early frees, snapshot, cleanup.
fn drive_workload(policy: i32) -> MemoryUsage {
  initialize();
  set_policy(policy);

  let mut rng = rand::thread_rng();
  let mut allocations: Vec<*mut u8> = vec![ptr::null_mut(); NUM_ALLOCATIONS];

  for i in 0..NUM_ALLOCATIONS {
    let size = rng.gen_range(MIN_SIZE..=MAX_SIZE);
    allocations[i] = unsafe { allocate(size) }.map_or(ptr::null_mut(), |p| p.as_ptr());

    if !allocations[i].is_null() {
      // Touch the payload so a misplaced block corrupts something.
      unsafe { allocations[i].write_bytes(i as u8, size) };
    }

    if rng.gen_bool(0.5) {
      let target = rng.gen_range(0..=i);
      if !allocations[target].is_null() {
        unsafe { free(allocations[target], true) };
        allocations[target] = ptr::null_mut();
      }
    }
  }

  assert_eq!(0, verify_heap(), "violations mid-workload under policy {policy}");

  let usage = snapshot(false);

  for slot in &mut allocations {
    if !slot.is_null() {
      unsafe { free(*slot, true) };
      *slot = ptr::null_mut();
    }
  }

  assert_eq!(0, verify_heap(), "violations after cleanup under policy {policy}");
  usage
}

#[test]
fn every_policy_survives_a_randomized_workload() {
  let _guard = serialized();

  for policy in [FIRST_FIT, BEST_FIT, WORST_FIT] {
    let usage = drive_workload(policy);

    assert!(usage.total_assigned > 0, "policy {policy} assigned nothing");
    assert_eq!(
      usage.total_fragmentation,
      usage.internal_fragmentation + usage.external_fragmentation,
    );
  }

  shutdown();
}

#[test]
fn end_to_end_scenario_with_logging() {
  let _guard = serialized();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("memory.log");

  initialize();
  open_log(&path).unwrap();
  set_policy(FIRST_FIT);

  unsafe {
    let p = allocate(100).expect("allocate");
    assert_eq!(0, verify_heap());

    for i in 0..100u8 {
      p.as_ptr().add(i as usize).write(i);
    }

    let q = allocate_zeroed(10, 4).expect("allocate_zeroed");
    assert_eq!(0, verify_heap());
    for i in 0..40 {
      assert_eq!(0, q.as_ptr().add(i).read(), "calloc byte {i} not zero");
    }

    let r = resize(p.as_ptr(), 200).expect("resize");
    assert_eq!(0, verify_heap());
    for i in 0..100u8 {
      assert_eq!(i, r.as_ptr().add(i as usize).read(), "resize lost byte {i}");
    }

    free(r.as_ptr(), true);
    assert_eq!(0, verify_heap());
    free(q.as_ptr(), true);
    assert_eq!(0, verify_heap());
  }

  close_log();

  let contents = std::fs::read_to_string(&path).unwrap();
  let ops: Vec<&str> = contents
    .lines()
    .map(|line| {
      line
        .split("Operation: ")
        .nth(1)
        .expect("malformed log line")
        .split(',')
        .next()
        .unwrap()
    })
    .collect();

  assert_eq!(vec!["malloc", "calloc", "realloc", "free", "free"], ops);
  shutdown();
}

#[test]
fn policy_comparison_reports_fragmentation_differences() {
  let _guard = serialized();

  // Same deterministic fragmentation probe under each policy: free holes
  // of distinct sizes, then a stream of small requests.
  for policy in [FIRST_FIT, BEST_FIT, WORST_FIT] {
    initialize();
    set_policy(policy);

    unsafe {
      // Interleave pins between the future holes so the freed blocks stay
      // apart instead of coalescing into one.
      let mut holes: Vec<*mut u8> = Vec::new();
      let mut pins: Vec<*mut u8> = Vec::new();
      for &n in &[64usize, 256, 1024, 64, 256, 1024] {
        holes.push(allocate(n).unwrap().as_ptr());
        pins.push(allocate(8).unwrap().as_ptr());
      }

      for hole in &holes {
        free(*hole, false);
      }

      for _ in 0..6 {
        allocate(48).unwrap();
      }

      assert_eq!(0, verify_heap(), "policy {policy}");

      let usage = snapshot(false);
      assert!(usage.total_assigned >= 6 * 48, "policy {policy}");

      for pin in &pins {
        free(*pin, true);
      }
    }
  }

  shutdown();
}
