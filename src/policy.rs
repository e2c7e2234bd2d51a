//! Placement policy selector.
//!
//! The selector is process-wide state governed by the facade mutex; the
//! numeric constants are the values accepted from callers.

use crate::error::AllocError;

/// Selector value for [`Policy::FirstFit`].
pub const FIRST_FIT: i32 = 0;
/// Selector value for [`Policy::BestFit`].
pub const BEST_FIT: i32 = 1;
/// Selector value for [`Policy::WorstFit`].
pub const WORST_FIT: i32 = 2;

/// How the free-list search chooses among free blocks of sufficient size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
  /// First free block large enough, in list order.
  #[default]
  FirstFit,
  /// Free block minimizing the leftover margin.
  BestFit,
  /// Free block maximizing the leftover margin.
  WorstFit,
}

impl TryFrom<i32> for Policy {
  type Error = AllocError;

  fn try_from(selector: i32) -> Result<Self, AllocError> {
    match selector {
      FIRST_FIT => Ok(Policy::FirstFit),
      BEST_FIT => Ok(Policy::BestFit),
      WORST_FIT => Ok(Policy::WorstFit),
      other => Err(AllocError::InvalidPolicy(other)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recognized_selectors_convert() {
    assert_eq!(Ok(Policy::FirstFit), Policy::try_from(FIRST_FIT));
    assert_eq!(Ok(Policy::BestFit), Policy::try_from(BEST_FIT));
    assert_eq!(Ok(Policy::WorstFit), Policy::try_from(WORST_FIT));
  }

  #[test]
  fn out_of_range_selectors_are_rejected() {
    for bad in [-1, 3, 42] {
      assert_eq!(Err(AllocError::InvalidPolicy(bad)), Policy::try_from(bad));
    }
  }
}
