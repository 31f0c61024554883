/// Width of a machine word, the unit every block size and payload address
/// is aligned to.
pub const WORD: usize = core::mem::size_of::<usize>();

/// Rounds the given size up to the next machine word multiple.
///
/// # Examples
///
/// ```rust
/// use markalloc::align;
///
/// match markalloc::WORD {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::WORD - 1) & !($crate::WORD - 1)
  };
}

/// Rounds the given address down to the previous machine word multiple.
#[macro_export]
macro_rules! align_down {
  ($value:expr) => {
    ($value) & !($crate::WORD - 1)
  };
}

/// Like [`align!`], but `None` instead of wrapping past `usize::MAX`.
pub fn checked_align(value: usize) -> Option<usize> {
  value.checked_add(WORD - 1).map(|v| align_down!(v))
}

pub fn is_aligned(value: usize) -> bool {
  value & (WORD - 1) == 0
}
