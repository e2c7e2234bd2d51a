//! Process-global facade.
//!
//! One mutex serializes every public operation on one process-wide heap, so
//! the four classic operations are safe to call from multiple threads. The
//! lock is taken exactly once per operation: `resize` reaches the allocate
//! and free logic through the heap's inherent methods instead of
//! re-entering the public surface, which is what lets a plain mutex stand
//! in for a recursive one.
//!
//! The operation log shares the same lock, so a record for operation O is
//! written after O's effects and before the next operation touches the log.

use std::io;
use std::path::Path;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::heap::Heap;
use crate::oplog::{OpKind, OperationLog};
use crate::stats::MemoryUsage;

struct GlobalHeap {
  heap: Heap,
  log: OperationLog,
}

static GLOBAL: Mutex<GlobalHeap> = Mutex::new(GlobalHeap {
  heap: Heap::new(),
  log: OperationLog::new(),
});

/// Resets the process-wide heap to its pristine empty state: no blocks,
/// first-fit policy, zeroed counters. Idempotent.
pub fn initialize() {
  GLOBAL.lock().heap.clear();
}

/// Tears the allocator down: forgets the heap and closes the operation
/// log. Pointers obtained earlier must not be used afterwards.
pub fn shutdown() {
  let mut global = GLOBAL.lock();
  global.heap.clear();
  global.log.close();
}

/// Opens (truncating) the operation log at `path`. See
/// [`crate::DEFAULT_LOG_PATH`] for the conventional location.
pub fn open_log<P: AsRef<Path>>(path: P) -> io::Result<()> {
  GLOBAL.lock().log.open(path)
}

pub fn close_log() {
  GLOBAL.lock().log.close();
}

/// Switches the process-wide placement policy; selectors are
/// [`crate::FIRST_FIT`], [`crate::BEST_FIT`] and [`crate::WORST_FIT`].
/// Anything else is reported and ignored.
pub fn set_policy(selector: i32) {
  GLOBAL.lock().heap.set_policy(selector);
}

/// Allocates `size` bytes from the process-wide heap.
///
/// # Safety
///
/// Writing through the returned pointer is sound for `size` bytes until the
/// matching [`free`].
pub unsafe fn allocate(size: usize) -> Option<NonNull<u8>> {
  let mut global = GLOBAL.lock();
  let GlobalHeap { heap, log } = &mut *global;

  let payload = unsafe { heap.allocate(size) }?;
  log.record(OpKind::Malloc, payload.as_ptr(), size);
  Some(payload)
}

/// Allocates `count * size` zero-filled bytes from the process-wide heap.
///
/// # Safety
///
/// Same contract as [`allocate`].
pub unsafe fn allocate_zeroed(
  count: usize,
  size: usize,
) -> Option<NonNull<u8>> {
  let mut global = GLOBAL.lock();
  let GlobalHeap { heap, log } = &mut *global;

  let payload = unsafe { heap.allocate_zeroed(count, size) }?;
  log.record(OpKind::Calloc, payload.as_ptr(), count * size);
  Some(payload)
}

/// Returns an allocation to the process-wide heap. Null pointers are
/// ignored; unknown pointers and double frees are reported and ignored.
/// With `release_trailing` set, a tail block spanning a whole mapping goes
/// back to the OS.
///
/// # Safety
///
/// `ptr` must be null or a pointer previously returned by this allocator,
/// and the payload must not be touched afterwards.
pub unsafe fn free(
  ptr: *mut u8,
  release_trailing: bool,
) {
  let mut global = GLOBAL.lock();
  let GlobalHeap { heap, log } = &mut *global;

  unsafe { heap.free(ptr, release_trailing) };

  if !ptr.is_null() {
    log.record(OpKind::Free, ptr, 0);
  }
}

/// Resizes an allocation, preserving the payload prefix. A null `ptr`
/// behaves as [`allocate`].
///
/// # Safety
///
/// Same contract as [`free`] for `ptr`; on success only the returned
/// pointer may be used.
pub unsafe fn resize(
  ptr: *mut u8,
  size: usize,
) -> Option<NonNull<u8>> {
  let mut global = GLOBAL.lock();
  let GlobalHeap { heap, log } = &mut *global;

  let payload = unsafe { heap.resize(ptr, size) }?;
  log.record(OpKind::Realloc, payload.as_ptr(), size);
  Some(payload)
}

/// Statistics snapshot of the process-wide heap; cumulative counters reset
/// on read, and `print` additionally dumps the report to standard output.
pub fn snapshot(print: bool) -> MemoryUsage {
  GLOBAL.lock().heap.usage(print)
}

/// Structural check of the process-wide heap; returns the number of
/// invariant violations found.
pub fn verify_heap() -> usize {
  GLOBAL.lock().heap.verify()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Mutex as StdMutex, MutexGuard};

  // The facade tests share one process-wide heap, so they take this lock
  // for their whole duration.
  static TEST_LOCK: StdMutex<()> = StdMutex::new(());

  fn serialized() -> MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  #[test]
  fn facade_round_trip_records_operations() {
    let _guard = serialized();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.log");

    initialize();
    open_log(&path).unwrap();

    unsafe {
      let p = allocate(100).unwrap();
      let q = allocate_zeroed(10, 4).unwrap();
      let r = resize(p.as_ptr(), 200).unwrap();
      free(r.as_ptr(), true);
      free(q.as_ptr(), true);
    }

    assert_eq!(0, verify_heap());
    close_log();

    let contents = std::fs::read_to_string(&path).unwrap();
    let ops: Vec<&str> = contents
      .lines()
      .map(|line| {
        line
          .split("Operation: ")
          .nth(1)
          .unwrap()
          .split(',')
          .next()
          .unwrap()
      })
      .collect();

    assert_eq!(vec!["malloc", "calloc", "realloc", "free", "free"], ops);
    shutdown();
  }

  #[test]
  fn concurrent_callers_never_corrupt_the_heap() {
    let _guard = serialized();
    initialize();

    let handles: Vec<_> = (0..4)
      .map(|worker| {
        std::thread::spawn(move || unsafe {
          for round in 0..50 {
            let size = 8 + (worker * 16 + round) % 256;
            if let Some(p) = allocate(size) {
              p.as_ptr().write_bytes(worker as u8, size);
              free(p.as_ptr(), round % 2 == 0);
            }
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(0, verify_heap());
    shutdown();
  }
}
