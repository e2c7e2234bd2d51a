//! Textual operation log.
//!
//! One newline-terminated record per public operation:
//!
//! ```text
//! [YYYY-MM-DD HH:MM:SS] Operation: <op>, Address: <hex-ptr>, Size: <n> bytes
//! ```
//!
//! Timestamps are local civil time. The file is opened with truncation and
//! flushed after every record, so the log survives a crash up to the last
//! completed operation. A record is appended after the operation's effects:
//! on success for the allocating operations, unconditionally for `free`
//! (which always records size 0).

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::{mem, ptr};

use log::warn;

/// Path used when the caller does not care where the log goes.
pub const DEFAULT_LOG_PATH: &str = "memory.log";

/// Operation names as they appear in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
  Malloc,
  Calloc,
  Realloc,
  Free,
}

impl OpKind {
  fn name(self) -> &'static str {
    match self {
      OpKind::Malloc => "malloc",
      OpKind::Calloc => "calloc",
      OpKind::Realloc => "realloc",
      OpKind::Free => "free",
    }
  }
}

/// Append-only log sink; silent while no file is open.
pub struct OperationLog {
  file: Option<File>,
}

impl OperationLog {
  pub const fn new() -> Self {
    Self { file: None }
  }

  /// Opens (and truncates) the log file, replacing any previous one.
  pub fn open<P: AsRef<Path>>(
    &mut self,
    path: P,
  ) -> io::Result<()> {
    self.file = Some(File::create(path)?);
    Ok(())
  }

  pub fn close(&mut self) {
    self.file = None;
  }

  /// Appends one record and flushes it. Log trouble is reported but never
  /// propagated; the allocation itself already succeeded.
  pub fn record(
    &mut self,
    op: OpKind,
    addr: *const u8,
    size: usize,
  ) {
    let Some(file) = self.file.as_mut() else {
      return;
    };

    let written = writeln!(
      file,
      "[{}] Operation: {}, Address: {:p}, Size: {} bytes",
      timestamp(),
      op.name(),
      addr,
      size,
    )
    .and_then(|_| file.flush());

    if let Err(err) = written {
      warn!("operation log write failed: {err}");
    }
  }
}

/// Local civil time, `YYYY-MM-DD HH:MM:SS`.
fn timestamp() -> String {
  unsafe {
    let now = libc::time(ptr::null_mut());
    let mut tm: libc::tm = mem::zeroed();
    libc::localtime_r(&now, &mut tm);

    format!(
      "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
      tm.tm_year + 1900,
      tm.tm_mon + 1,
      tm.tm_mday,
      tm.tm_hour,
      tm.tm_min,
      tm.tm_sec,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn records_have_the_documented_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.log");

    let mut log = OperationLog::new();
    log.open(&path).unwrap();
    log.record(OpKind::Malloc, 0x1000 as *const u8, 100);
    log.record(OpKind::Free, 0x1000 as *const u8, 0);
    log.close();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(2, lines.len());

    let line = lines[0];
    // "[YYYY-MM-DD HH:MM:SS] " is a fixed 22-byte prefix.
    assert_eq!(Some('['), line.chars().next());
    assert_eq!(Some(']'), line.chars().nth(20));
    assert_eq!(Some('-'), line.chars().nth(5));
    assert_eq!(Some(':'), line.chars().nth(14));
    assert!(line[21..].starts_with(" Operation: malloc, Address: 0x"));
    assert!(line.ends_with("Size: 100 bytes"));

    assert!(lines[1].contains("Operation: free"));
    assert!(lines[1].ends_with("Size: 0 bytes"));
  }

  #[test]
  fn reopening_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.log");

    let mut log = OperationLog::new();
    log.open(&path).unwrap();
    log.record(OpKind::Malloc, 0x2000 as *const u8, 8);
    log.open(&path).unwrap();
    log.close();

    assert!(std::fs::read_to_string(&path).unwrap().is_empty());
  }

  #[test]
  fn recording_without_a_file_is_a_noop() {
    let mut log = OperationLog::new();
    log.record(OpKind::Realloc, 0x3000 as *const u8, 16);
  }

  #[test]
  fn timestamp_is_plausible_civil_time() {
    let ts = timestamp();
    assert_eq!(19, ts.len());

    let year: i32 = ts[0..4].parse().unwrap();
    let month: u32 = ts[5..7].parse().unwrap();
    let day: u32 = ts[8..10].parse().unwrap();
    let hour: u32 = ts[11..13].parse().unwrap();

    assert!(year >= 2024);
    assert!((1..=12).contains(&month));
    assert!((1..=31).contains(&day));
    assert!(hour < 24);
  }
}
