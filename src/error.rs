use std::{error, fmt};

/// Failure kinds surfaced by the allocator, in order of severity.
///
/// None of these abort the process: the public operations flatten them to a
/// `None` return (or a plain return for `free`) and emit a diagnostic on the
/// error stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// `count * size` overflowed in a zero-initialized allocation.
  SizeOverflow,
  /// The operating system refused to map more address space.
  OutOfAddressSpace,
  /// A policy selector outside `{0, 1, 2}` was supplied.
  InvalidPolicy(i32),
  /// A pointer handed to `resize` does not belong to the heap.
  InvalidAddress,
  /// A block was freed while already free.
  DoubleFree,
  /// The trailing-release unmap was rejected; the block was re-attached.
  UnmapFailed,
  /// Arguments to `unmap` do not describe a live mapping.
  InvalidRegion,
}

impl fmt::Display for AllocError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::SizeOverflow => write!(f, "allocation size overflows"),
      Self::OutOfAddressSpace => write!(f, "out of address space"),
      Self::InvalidPolicy(selector) => {
        write!(f, "invalid placement policy {selector} (expected 0, 1 or 2)")
      }
      Self::InvalidAddress => write!(f, "address does not belong to the heap"),
      Self::DoubleFree => write!(f, "block is already free"),
      Self::UnmapFailed => write!(f, "trailing release rejected by the OS"),
      Self::InvalidRegion => write!(f, "arguments do not match a live mapping"),
    }
  }
}

impl error::Error for AllocError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_names_the_offending_selector() {
    let msg = AllocError::InvalidPolicy(7).to_string();
    assert!(msg.contains('7'), "got: {msg}");
  }
}
