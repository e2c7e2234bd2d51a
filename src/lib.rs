//! # fitalloc - A Policy-Driven Memory Allocator Library
//!
//! This crate implements a general-purpose dynamic memory allocator that
//! obtains large regions of address space from the operating system with
//! `mmap` and carves them into variably-sized blocks behind the classic
//! four-operation interface (allocate, free, zero-initialized allocate,
//! resize).
//!
//! ## Overview
//!
//! The heap is an intrusive doubly-linked list of blocks sorted by
//! increasing address. Each block carries a fixed 40-byte header directly
//! in front of the user-visible payload:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ next, prev      │  │  │                          │  │
//!   │  │ free: bool      │  │  │     N bytes usable       │  │
//!   │  │ mapped: bool    │  │  │                          │  │
//!   │  │ data: *mut u8   │  │  └──────────────────────────┘  │
//!   │  └─────────────────┘  │                                │
//!   │      40 bytes         │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! Freed blocks stay on the list and are found again by one of three
//! placement policies (first-fit, best-fit, worst-fit), split when they are
//! larger than needed and merged with free neighbours when given back. Only
//! a free tail block that still spans one whole OS mapping is ever returned
//! to the kernel.
//!
//! ## Crate Structure
//!
//! ```text
//!   fitalloc
//!   ├── align      - Alignment macro (8-byte quantum)
//!   ├── block      - Block header layout and address arithmetic
//!   ├── region     - Anonymous page mapping (mmap/munmap)
//!   ├── policy     - Placement policy selector
//!   ├── heap       - List search, split, coalesce, verify (the engine)
//!   ├── stats      - Usage counters and snapshot
//!   ├── oplog      - Textual operation log
//!   ├── manager    - Thread-safe process-global facade
//!   └── error      - Failure kinds
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fitalloc::{BEST_FIT, allocate, free, initialize, set_policy, snapshot};
//!
//! fn main() {
//!     initialize();
//!     set_policy(BEST_FIT);
//!
//!     unsafe {
//!         let ptr = allocate(128).expect("out of memory");
//!         ptr.as_ptr().write_bytes(0x42, 128);
//!         free(ptr.as_ptr(), true);
//!     }
//!
//!     snapshot(true);
//! }
//! ```
//!
//! ## Thread Safety
//!
//! Every public operation serializes on a single process-wide mutex, so the
//! allocator may be called from any number of threads. There is no finer
//! grained locking and no lock-free path.
//!
//! ## Safety
//!
//! This crate is inherently unsafe at its edges: it hands out raw pointers
//! into memory it manages itself. The pointer-consuming operations are
//! `unsafe fn`s whose contracts mirror the C allocation interface: free and
//! resize only what this allocator returned, and never touch a payload
//! after giving it back.

pub mod align;
pub mod block;
mod error;
mod heap;
mod manager;
mod oplog;
mod policy;
mod region;
mod stats;

pub use error::AllocError;
pub use heap::Heap;
pub use manager::{
  allocate, allocate_zeroed, close_log, free, initialize, open_log, resize, set_policy, shutdown,
  snapshot, verify_heap,
};
pub use oplog::DEFAULT_LOG_PATH;
pub use policy::{BEST_FIT, FIRST_FIT, Policy, WORST_FIT};
pub use stats::MemoryUsage;
