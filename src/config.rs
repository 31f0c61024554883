use crate::error::HeapError;

/// Tunables for a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Smallest payload a split remainder may have. A free block is only split
  /// when the tail left over is at least this large.
  pub min_split: usize,
  /// Maximum number of blocks walked by [`Heap::dump`](crate::Heap::dump).
  pub dump_limit: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      min_split: 8,
      dump_limit: 20,
    }
  }
}

impl HeapConfig {
  pub fn validate(&self) -> Result<(), HeapError> {
    if self.min_split == 0 {
      return Err(HeapError::InvalidConfig("min_split must be > 0"));
    }
    if self.dump_limit == 0 {
      return Err(HeapError::InvalidConfig("dump_limit must be > 0"));
    }
    Ok(())
  }
}
