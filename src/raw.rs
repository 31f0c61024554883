//! Raw word access for the conservative scanner.
//!
//! This is the only place where arbitrary address ranges (static data, the
//! stack, block payloads) are read as machine words. Everything above it
//! works with [`BlockRef`](crate::block::BlockRef) handles and plain `usize`
//! addresses.

use core::{ops::Range, ptr};

use crate::{align_down, WORD};

/// Trims a byte range to the whole, aligned words it contains.
pub fn word_range(range: Range<usize>) -> Range<usize> {
  let start = crate::align::checked_align(range.start).unwrap_or(usize::MAX);
  let end = align_down!(range.end);
  if start >= end { start..start } else { start..end }
}

/// Iterator over the words of an address range, lowest address first.
pub struct Words {
  cursor: usize,
  end: usize,
}

impl Iterator for Words {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    if self.cursor >= self.end {
      return None;
    }
    // SAFETY: the range was vouched for when the iterator was built.
    let value = unsafe { ptr::read_volatile(self.cursor as *const usize) };
    self.cursor += WORD;
    Some(value)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let n = (self.end - self.cursor) / WORD;
    (n, Some(n))
  }
}

/// Reads every aligned word in `range`.
///
/// Reads are volatile: the values may have been written through pointers
/// the compiler never saw, and must be taken as they are in memory.
///
/// # Safety
///
/// Every byte of `range` must be mapped and readable for as long as the
/// iterator is in use.
pub unsafe fn words(range: Range<usize>) -> Words {
  let range = word_range(range);
  Words {
    cursor: range.start,
    end: range.end,
  }
}

/// Copies `len` bytes between two payloads.
///
/// # Safety
///
/// Both ranges must be valid for `len` bytes and must not overlap.
pub unsafe fn copy_payload(
  src: ptr::NonNull<u8>,
  dst: ptr::NonNull<u8>,
  len: usize,
) {
  unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), len) };
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_word_range_trims_to_whole_words() {
    assert_eq!(word_range(WORD + 1..WORD * 4 - 1), WORD * 2..WORD * 3);
    assert_eq!(word_range(WORD..WORD * 4), WORD..WORD * 4);
    assert!(word_range(WORD * 4..WORD).is_empty());
    assert!(word_range(WORD + 1..WORD + 3).is_empty());
  }

  #[test]
  fn test_words_reads_in_order() {
    let data = [3usize, 1, 4, 1, 5];
    let start = data.as_ptr() as usize;

    let read: Vec<usize> = unsafe { words(start..start + data.len() * WORD) }.collect();

    assert_eq!(read, data);
  }

  #[test]
  fn test_words_skips_partial_tail() {
    let data = [7usize, 8, 9];
    let start = data.as_ptr() as usize;

    let read: Vec<usize> = unsafe { words(start..start + 2 * WORD + 3) }.collect();

    assert_eq!(read, vec![7, 8]);
  }
}
