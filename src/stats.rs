//! Per-operation statistics.
//!
//! Three cumulative counters accrue under the facade mutex and are handed
//! out (then reset) by the snapshot operation; external fragmentation is not
//! a counter but is computed freshly from the block list on every snapshot.

use std::mem;

/// Cumulative counters owned by the heap, reset on every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Counters {
  /// Total payload bytes handed to callers.
  pub assigned: usize,
  /// Total payload bytes returned by callers.
  pub freed: usize,
  /// Reserved-but-unrequested bytes accrued at placement time.
  pub internal_fragmentation: usize,
}

impl Counters {
  pub const fn new() -> Self {
    Self {
      assigned: 0,
      freed: 0,
      internal_fragmentation: 0,
    }
  }

  /// Returns the current values and resets every counter to zero.
  pub fn take(&mut self) -> Self {
    mem::replace(self, Self::new())
  }
}

/// Snapshot returned by the statistics operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
  /// Payload bytes assigned since the previous snapshot.
  pub total_assigned: usize,
  /// Payload bytes freed since the previous snapshot.
  pub total_free: usize,
  /// Reserved-but-unrequested bytes inside live blocks.
  pub internal_fragmentation: usize,
  /// Bytes held by free blocks too small to satisfy any useful request.
  pub external_fragmentation: usize,
  /// Sum of the two fragmentation figures.
  pub total_fragmentation: usize,
}

impl MemoryUsage {
  /// Human-readable report on standard output.
  pub(crate) fn dump(&self) {
    println!("Memory usage");
    println!("  Total assigned: {} bytes", self.total_assigned);
    println!("  Total free: {} bytes", self.total_free);
    println!("  Internal fragmentation: {} bytes", self.internal_fragmentation);
    println!("  External fragmentation: {} bytes", self.external_fragmentation);
    println!("  Total fragmentation: {} bytes", self.total_fragmentation);
  }
}
