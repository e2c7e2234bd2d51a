//! # Heap engine
//!
//! The heap is an intrusive doubly-linked list of blocks sorted by
//! increasing address. Every block is a contiguous range whose prefix is a
//! fixed 40-byte header and whose suffix is the user-visible payload; the
//! list head is called the *base* and there is no sentinel node and no
//! separate index.
//!
//! ## Memory Layout Diagram
//!
//! ```text
//!   Heap
//!   ┌─────────┐
//!   │ base ───┼──┐
//!   └─────────┘  │
//!                ▼
//!   ┌────────────────────┐    ┌────────────────────┐    ┌────────────────────┐
//!   │ size: 64           │    │ size: 128          │    │ size: 32           │
//!   │ free: false        │◄───┼─prev   free: true  │◄───┼─prev  free: false  │
//!   │ next: ─────────────┼───►│ next: ─────────────┼───►│ next: null         │
//!   │ mapped: true       │    │ mapped: true       │    │ mapped: true       │
//!   ├────────────────────┤    ├────────────────────┤    ├────────────────────┤
//!   │    [User Data]     │    │    [Free Space]    │    │    [User Data]     │
//!   │    (64 bytes)      │    │    (128 bytes)     │    │    (32 bytes)      │
//!   └────────────────────┘    └────────────────────┘    └────────────────────┘
//! ```
//!
//! ## Allocation Process
//!
//! ```text
//!   STEP 1: round the request up to the 8-byte quantum
//!   STEP 2: search the list under the current placement policy
//!           (first-fit, best-fit or worst-fit), remembering the tail
//!   STEP 3: hit  -> split the block when the margin allows it
//!           miss -> map a fresh region and chain it after the tail
//!   STEP 4: mark the block used, account the assigned bytes
//!   STEP 5: hand out the payload address (header address + 40)
//! ```
//!
//! ## Split
//!
//! ```text
//!   Before:                         After split at s:
//!   ┌────────┬─────────────────┐    ┌────────┬───────┬────────┬────────┐
//!   │ header │  payload (big)  │    │ header │  s    │ header │ rest   │
//!   └────────┴─────────────────┘    └────────┴───────┴────────┴────────┘
//!                                            ▲        ▲
//!                                   returned ┘        └ new free block,
//!                                                       linked in place
//! ```
//!
//! A split only happens when the leftover can hold a header plus the
//! minimum payload; otherwise the whole block is handed out and the margin
//! accrues to internal fragmentation.
//!
//! ## Coalesce
//!
//! Freeing a block merges it with free list neighbours in both directions,
//! so the list never holds two adjacent free blocks. The survivor is the
//! lowest-addressed block of the run. A merge that absorbs a neighbour from
//! a different OS mapping clears the survivor's `mapped` flag; such a block
//! no longer spans a single mapping and is never handed back to the OS.
//!
//! ## Trailing release
//!
//! `free` with the release flag set returns the tail block's mapping to the
//! OS when the tail is free and still spans one whole mapping. A rejected
//! unmap re-attaches the block and the heap continues unharmed.

use std::ptr::{self, NonNull};

use libc::sbrk;
use log::{debug, error, warn};

use crate::align;
use crate::block::{self, Block, HEADER_SIZE, MIN_PAYLOAD};
use crate::error::AllocError;
use crate::policy::Policy;
use crate::region;
use crate::stats::{Counters, MemoryUsage};

/// Initial difference tracked by the best-fit search. A free block whose
/// margin is not below this value is treated as no better than extending
/// the heap.
const PAGE_SENTINEL: usize = 4096;

/// Largest payload size the verifier accepts as sane.
const VERIFY_MAX_SIZE: usize = 1_000_000;

/// The heap engine: block list, placement policy and statistics counters.
///
/// All methods require external serialization; the public facade wraps one
/// instance in a process-global mutex. `resize` reaches `allocate` and
/// `free` through these inherent methods, so no lock is ever re-entered.
pub struct Heap {
  /// Head of the block list; null while the heap is empty.
  base: *mut Block,
  policy: Policy,
  counters: Counters,
}

// The raw block pointers are owned by the heap and only reached through
// these methods; the facade serializes every caller.
unsafe impl Send for Heap {}

impl Default for Heap {
  fn default() -> Self {
    Self::new()
  }
}

impl Heap {
  pub const fn new() -> Self {
    Self {
      base: ptr::null_mut(),
      policy: Policy::FirstFit,
      counters: Counters::new(),
    }
  }

  /// Switches the placement policy. An unrecognized selector is reported
  /// and leaves the current policy in force.
  pub fn set_policy(
    &mut self,
    selector: i32,
  ) {
    match Policy::try_from(selector) {
      Ok(policy) => self.policy = policy,
      Err(err) => error!("{err}"),
    }
  }

  pub fn policy(&self) -> Policy {
    self.policy
  }

  /// Walks the list under the current policy looking for a free block able
  /// to hold `size` bytes. Also returns the last block visited, which the
  /// allocation path uses to chain a fresh extension when nothing fits.
  fn find_block(
    &self,
    size: usize,
  ) -> (Option<NonNull<Block>>, *mut Block) {
    let mut tail: *mut Block = ptr::null_mut();
    let mut b = self.base;

    match self.policy {
      Policy::FirstFit => {
        while !b.is_null() {
          unsafe {
            if (*b).free && (*b).size >= size {
              return (NonNull::new(b), tail);
            }
            tail = b;
            b = (*b).next;
          }
        }
        (None, tail)
      }

      Policy::BestFit => {
        // An exact fit wins immediately; otherwise keep the block with the
        // smallest margin strictly below the running difference, which
        // starts at one page.
        let mut best: Option<NonNull<Block>> = None;
        let mut dif = PAGE_SENTINEL;

        while !b.is_null() {
          unsafe {
            if (*b).free {
              if (*b).size == size {
                return (NonNull::new(b), tail);
              }
              if (*b).size > size && (*b).size - size < dif {
                dif = (*b).size - size;
                best = NonNull::new(b);
              }
            }
            tail = b;
            b = (*b).next;
          }
        }
        (best, tail)
      }

      Policy::WorstFit => {
        // Symmetric to best-fit: keep the block with the largest margin,
        // first occurrence winning ties.
        let mut worst: Option<NonNull<Block>> = None;
        let mut dif = 0usize;

        while !b.is_null() {
          unsafe {
            if (*b).free && (*b).size >= size {
              let margin = (*b).size - size;
              if worst.is_none() || margin > dif {
                dif = margin;
                worst = NonNull::new(b);
              }
            }
            tail = b;
            b = (*b).next;
          }
        }
        (worst, tail)
      }
    }
  }

  /// Maps a fresh region sized for a `s`-byte payload and chains its single
  /// block after `last` (or leaves it unlinked when `last` is null). The
  /// new block is born used and spans the whole mapping.
  fn extend(
    &mut self,
    last: *mut Block,
    s: usize,
  ) -> Result<NonNull<Block>, AllocError> {
    let addr = region::map(HEADER_SIZE + s)?;
    let b = addr.cast::<Block>().as_ptr();

    unsafe {
      b.write(Block::new(s, ptr::null_mut(), last, false, true));
      (*b).data = block::payload_of(b);

      if !last.is_null() {
        (*last).next = b;
      }

      Ok(NonNull::new_unchecked(b))
    }
  }

  /// Splits `b` at payload size `s` when the leftover can hold a header
  /// plus the minimum payload; otherwise leaves the block whole and accrues
  /// the margin to internal fragmentation.
  ///
  /// # Safety
  ///
  /// `b` must be a live block of this heap with `(*b).size >= s`.
  unsafe fn maybe_split(
    &mut self,
    b: *mut Block,
    s: usize,
  ) {
    unsafe {
      let margin = (*b).size - s;

      if margin < HEADER_SIZE + MIN_PAYLOAD {
        self.counters.internal_fragmentation += margin;
        return;
      }

      // The suffix becomes a new free block directly after the s-byte
      // payload, inheriting the mapped flag of the block it came from.
      let new = (b as *mut u8).add(HEADER_SIZE + s) as *mut Block;
      new.write(Block::new(
        margin - HEADER_SIZE,
        (*b).next,
        b,
        true,
        (*b).mapped,
      ));
      (*new).data = block::payload_of(new);

      if !(*new).next.is_null() {
        (*(*new).next).prev = new;
      }

      (*b).next = new;
      (*b).size = s;
    }
  }

  /// Merges a newly freed block with free neighbours in both directions and
  /// returns the survivor (the lowest-addressed block of the run).
  ///
  /// # Safety
  ///
  /// `b` must be a live, free block of this heap.
  unsafe fn coalesce(
    &mut self,
    mut b: *mut Block,
  ) -> *mut Block {
    unsafe {
      while !(*b).next.is_null() && (*(*b).next).free {
        absorb(b, (*b).next);
      }

      while !(*b).prev.is_null() && (*(*b).prev).free {
        let prev = (*b).prev;
        absorb(prev, b);
        b = prev;
      }

      b
    }
  }

  /// True when `ptr` is the payload address of some block in the list.
  ///
  /// Mappings from separate extensions need not be contiguous, so validity
  /// is never inferred from a pointer-range test.
  fn is_valid(
    &self,
    ptr: *mut u8,
  ) -> bool {
    let mut b = self.base;

    while !b.is_null() {
      unsafe {
        if (*b).data == ptr {
          return true;
        }
        b = (*b).next;
      }
    }

    false
  }

  /// Allocates `size` bytes and returns the payload address, or `None` for
  /// a zero-size request or when the OS refuses more address space.
  ///
  /// # Safety
  ///
  /// The heap must not be reached concurrently; the facade's mutex provides
  /// that. Writing through the returned pointer is sound for `size` bytes
  /// until the matching `free`.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if size == 0 {
      return None;
    }

    let s = align!(size);

    if self.base.is_null() {
      let b = match self.extend(ptr::null_mut(), s) {
        Ok(b) => b.as_ptr(),
        Err(err) => {
          warn!("heap extension failed: {err}");
          return None;
        }
      };

      self.base = b;
      self.counters.assigned += s;
      return NonNull::new(unsafe { (*b).data });
    }

    let (found, tail) = self.find_block(s);

    match found {
      Some(b) => {
        let b = b.as_ptr();
        unsafe {
          self.maybe_split(b, s);
          (*b).free = false;
          self.counters.assigned += (*b).size;
          NonNull::new((*b).data)
        }
      }
      None => match self.extend(tail, s) {
        Ok(b) => {
          self.counters.assigned += s;
          NonNull::new(unsafe { (*b.as_ptr()).data })
        }
        Err(err) => {
          warn!("heap extension failed: {err}");
          None
        }
      },
    }
  }

  /// Allocates `count * size` bytes and zero-fills them. Returns `None` for
  /// a zero count or size, and on multiplication overflow.
  ///
  /// # Safety
  ///
  /// Same contract as [`Heap::allocate`].
  pub unsafe fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if count == 0 || size == 0 {
      return None;
    }

    let total = match count.checked_mul(size) {
      Some(total) => total,
      None => {
        warn!("{}", AllocError::SizeOverflow);
        return None;
      }
    };

    let payload = unsafe { self.allocate(total) }?;

    unsafe {
      ptr::write_bytes(payload.as_ptr(), 0, total);
    }

    Some(payload)
  }

  /// Returns a block to the free pool and merges it with free neighbours.
  ///
  /// A null or unknown pointer is ignored; freeing an already free block
  /// reports a double free and changes nothing. With `release_trailing`
  /// set, a free tail block that still spans one whole mapping is handed
  /// back to the OS.
  ///
  /// # Safety
  ///
  /// `ptr` must be null, or a pointer previously returned by this heap; the
  /// caller must not touch the payload afterwards.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
    release_trailing: bool,
  ) {
    if ptr.is_null() {
      return;
    }

    if !self.is_valid(ptr) {
      warn!("free of unknown address {ptr:p} ignored");
      return;
    }

    let b = block::header_of(ptr);

    unsafe {
      if (*b).free {
        warn!("free of {ptr:p}: {}", AllocError::DoubleFree);
        return;
      }

      (*b).free = true;
      self.counters.freed += (*b).size;

      let b = self.coalesce(b);

      if release_trailing && (*b).next.is_null() && (*b).mapped && (*b).free {
        self.release_tail(b);
      }
    }
  }

  /// Detaches the free tail block and returns its mapping to the OS. On a
  /// rejected unmap the block is re-attached and the failure reported.
  ///
  /// # Safety
  ///
  /// `b` must be the free tail of the list with its `mapped` flag set.
  unsafe fn release_tail(
    &mut self,
    b: *mut Block,
  ) {
    unsafe {
      let prev = (*b).prev;

      if prev.is_null() {
        self.base = ptr::null_mut();
      } else {
        (*prev).next = ptr::null_mut();
      }

      let bytes = HEADER_SIZE + (*b).size;
      if let Err(err) = region::unmap(NonNull::new_unchecked(b as *mut u8), bytes) {
        if prev.is_null() {
          self.base = b;
        } else {
          (*prev).next = b;
        }
        warn!("{}: {err}", AllocError::UnmapFailed);
      }
    }
  }

  /// Grows or shrinks an allocation, preserving the payload prefix.
  ///
  /// A null pointer behaves as a fresh allocation; a pointer the heap does
  /// not know is reported and yields `None`. Shrinking splits in place when
  /// the margin permits. Growing first tries to absorb a free successor,
  /// then falls back to allocate-copy-free, copying the smaller of the old
  /// and new payload sizes.
  ///
  /// # Safety
  ///
  /// Same contract as [`Heap::free`] for `ptr`; on success the old pointer
  /// must no longer be used unless it was returned back.
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if ptr.is_null() {
      return unsafe { self.allocate(size) };
    }

    if size == 0 {
      return None;
    }

    if !self.is_valid(ptr) {
      warn!("resize of {ptr:p}: {}", AllocError::InvalidAddress);
      return None;
    }

    let s = align!(size);
    let b = block::header_of(ptr);

    unsafe {
      if (*b).size >= s {
        self.maybe_split(b, s);
        return NonNull::new(ptr);
      }

      let next = (*b).next;
      if !next.is_null() && (*next).free && (*b).size + HEADER_SIZE + (*next).size >= s {
        absorb(b, next);
        self.maybe_split(b, s);
        return NonNull::new(ptr);
      }

      let new = self.allocate(s)?;
      ptr::copy_nonoverlapping(ptr, new.as_ptr(), (*b).size.min(s));
      self.free(ptr, false);
      Some(new)
    }
  }

  /// Statistics snapshot. The three cumulative counters are returned and
  /// reset; external fragmentation is computed freshly from the list. With
  /// `print` set, a human-readable report also goes to standard output.
  pub fn usage(
    &mut self,
    print: bool,
  ) -> MemoryUsage {
    let external = self.external_fragmentation();
    let taken = self.counters.take();

    let usage = MemoryUsage {
      total_assigned: taken.assigned,
      total_free: taken.freed,
      internal_fragmentation: taken.internal_fragmentation,
      external_fragmentation: external,
      total_fragmentation: taken.internal_fragmentation + external,
    };

    if print {
      usage.dump();
    }

    usage
  }

  /// Sum of the sizes of free blocks too small to satisfy any useful
  /// request.
  fn external_fragmentation(&self) -> usize {
    let mut sum = 0;
    let mut b = self.base;

    while !b.is_null() {
      unsafe {
        if (*b).free && (*b).size < HEADER_SIZE + MIN_PAYLOAD {
          sum += (*b).size;
        }
        b = (*b).next;
      }
    }

    sum
  }

  /// Walks the list checking structural invariants and returns how many
  /// violations were found. Per-block header values go to the debug log;
  /// violations are reported as warnings. Never mutates the heap.
  ///
  /// Checked per block: both back-links, no adjacent free pair, and a sane
  /// payload size. Blocks lying below the program break and payload
  /// pointers that drifted from the header arithmetic are reported as
  /// suspicious without counting as violations.
  pub fn verify(&self) -> usize {
    let mut violations = 0;
    let brk = unsafe { sbrk(0) } as *mut u8;
    let mut b = self.base;

    while !b.is_null() {
      unsafe {
        debug!(
          "block {:p}: size={} free={} mapped={} prev={:p} next={:p} data={:p}",
          b,
          (*b).size,
          (*b).free,
          (*b).mapped,
          (*b).prev,
          (*b).next,
          (*b).data,
        );

        if !(*b).next.is_null() && (*(*b).next).prev != b {
          warn!("block {:p}: next block's back-link does not return here", b);
          violations += 1;
        }

        if !(*b).prev.is_null() && (*(*b).prev).next != b {
          warn!("block {:p}: previous block does not link here", b);
          violations += 1;
        }

        if !(*b).next.is_null() && (*b).free && (*(*b).next).free {
          warn!("block {:p}: adjacent free pair was never coalesced", b);
          violations += 1;
        }

        if (*b).size == 0 || (*b).size > VERIFY_MAX_SIZE {
          warn!("block {:p}: payload size {} out of range", b, (*b).size);
          violations += 1;
        }

        if (*b).data != block::payload_of(b) {
          warn!("block {:p}: payload pointer drifted to {:p}", b, (*b).data);
        }

        if (b as *mut u8) < brk {
          warn!("block {:p}: address precedes the program break {:p}", b, brk);
        }

        b = (*b).next;
      }
    }

    violations
  }

  /// Forgets the whole heap and resets policy and counters. Remaining
  /// mappings are abandoned to process teardown; only the trailing-release
  /// rule ever returns memory to the OS early.
  pub fn clear(&mut self) {
    self.base = ptr::null_mut();
    self.policy = Policy::FirstFit;
    self.counters = Counters::new();
  }

  #[cfg(test)]
  fn blocks(&self) -> Vec<(usize, bool, bool)> {
    let mut out = Vec::new();
    let mut b = self.base;
    while !b.is_null() {
      unsafe {
        out.push(((*b).size, (*b).free, (*b).mapped));
        b = (*b).next;
      }
    }
    out
  }

  #[cfg(test)]
  fn base_is_empty(&self) -> bool {
    self.base.is_null()
  }
}

/// Absorbs `next` into `b`, repairing the links behind it. Keeps the
/// survivor's `mapped` flag only when both blocks were mapped and the
/// absorbed neighbour was physically contiguous; a merge across a mapping
/// gap must never reach the OS as a unit.
///
/// # Safety
///
/// `b` and `next` must be live blocks with `(*b).next == next`.
unsafe fn absorb(
  b: *mut Block,
  next: *mut Block,
) {
  unsafe {
    let end = (b as *mut u8).wrapping_add(HEADER_SIZE + (*b).size);
    let contiguous = end == next as *mut u8;

    (*b).mapped = (*b).mapped && (*next).mapped && contiguous;
    (*b).size += HEADER_SIZE + (*next).size;
    (*b).next = (*next).next;

    if !(*b).next.is_null() {
      (*(*b).next).prev = b;
    }
  }
}
