use std::{mem, ptr};

use static_assertions::const_assert_eq;

/// Alignment quantum for payload sizes.
pub const ALIGNMENT: usize = 8;

/// Size of a block header in bytes.
///
/// This constant is part of the heap's ABI: a user pointer is mapped back to
/// its header by subtracting it, so it must stay `40` on every target. The
/// `_reserved` tail of [`Block`] pads the struct to exactly this size.
pub const HEADER_SIZE: usize = 40;

/// Smallest payload worth carving out of a split.
pub const MIN_PAYLOAD: usize = 4;

const RESERVED: usize = HEADER_SIZE - 4 * mem::size_of::<usize>() - 2;

/// Header prefix of every heap block. The payload follows immediately after.
#[repr(C)]
pub struct Block {
  /// Payload bytes owned by this block, not counting the header.
  pub size: usize,
  /// Next block in address order, or null at the tail.
  pub next: *mut Block,
  /// Previous block in address order, or null at the base.
  pub prev: *mut Block,
  /// True when the payload belongs to the free pool.
  pub free: bool,
  /// True while the block still spans an entire OS mapping and may be
  /// returned to the OS as a unit.
  pub mapped: bool,
  _reserved: [u8; RESERVED],
  /// Address of the payload; always `address(self) + HEADER_SIZE`.
  pub data: *mut u8,
}

const_assert_eq!(mem::size_of::<Block>(), HEADER_SIZE);

impl Block {
  pub fn new(
    size: usize,
    next: *mut Block,
    prev: *mut Block,
    free: bool,
    mapped: bool,
  ) -> Self {
    Self {
      size,
      next,
      prev,
      free,
      mapped,
      _reserved: [0; RESERVED],
      data: ptr::null_mut(),
    }
  }
}

/// Recovers the header address from a user pointer.
///
/// Pure address arithmetic; nothing is dereferenced, and the result is only
/// meaningful for pointers that a list walk has validated.
pub fn header_of(user_ptr: *mut u8) -> *mut Block {
  user_ptr.wrapping_sub(HEADER_SIZE) as *mut Block
}

/// Computes the payload address of a block header.
pub fn payload_of(block: *mut Block) -> *mut u8 {
  (block as *mut u8).wrapping_add(HEADER_SIZE)
}
