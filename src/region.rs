//! Anonymous page mapping, the unit of heap extension.
//!
//! The heap grows by whole `mmap` regions and shrinks only through the
//! trailing-release rule, so this module is deliberately small: one call to
//! obtain a private, readable and writable range, one call to hand a range
//! back. Callers supply total bytes (header plus payload); the kernel rounds
//! to page granularity on its own.

use std::ptr::{self, NonNull};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void};

use crate::error::AllocError;

#[cfg(test)]
pub(crate) static UNMAP_COUNT: std::sync::atomic::AtomicUsize =
  std::sync::atomic::AtomicUsize::new(0);

/// Maps `bytes` of fresh anonymous memory, readable and writable, never
/// shared with another process.
pub fn map(bytes: usize) -> Result<NonNull<u8>, AllocError> {
  let addr = unsafe {
    libc::mmap(
      ptr::null_mut(),
      bytes,
      PROT_READ | PROT_WRITE,
      MAP_PRIVATE | MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  if addr == MAP_FAILED {
    return Err(AllocError::OutOfAddressSpace);
  }

  NonNull::new(addr as *mut u8).ok_or(AllocError::OutOfAddressSpace)
}

/// Releases a range previously obtained from [`map`].
///
/// Fails with [`AllocError::InvalidRegion`] when the arguments do not match
/// a live mapping, in which case nothing has been released and the caller
/// may keep using the range.
pub fn unmap(
  addr: NonNull<u8>,
  bytes: usize,
) -> Result<(), AllocError> {
  let rc = unsafe { libc::munmap(addr.as_ptr() as *mut c_void, bytes) };

  if rc != 0 {
    return Err(AllocError::InvalidRegion);
  }

  #[cfg(test)]
  UNMAP_COUNT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mapped_range_is_usable_and_unmappable() {
    let addr = map(4096).expect("fresh anonymous mapping");

    unsafe {
      addr.as_ptr().write_bytes(0xA5, 4096);
      assert_eq!(0xA5, addr.as_ptr().read());
    }

    unmap(addr, 4096).expect("live mapping releases cleanly");
  }

  #[test]
  fn unmap_rejects_an_unaligned_address() {
    let bogus = NonNull::new(0x1235_usize as *mut u8).unwrap();

    assert_eq!(Err(AllocError::InvalidRegion), unmap(bogus, 4096));
  }
}
