use core::{
  fmt,
  ptr::{self, NonNull},
};

use libc::{c_void, intptr_t, sbrk};

use crate::{WORD, align};

/// Where the arena gets its address space from.
///
/// # Safety
///
/// Implementors must hand out, for every successful `extend(delta)`, a
/// word-aligned pointer to `delta` readable and writable bytes that stay valid
/// for the lifetime of the source. Each range must start above every range
/// returned before it: the heap relies on blocks appearing in strictly
/// increasing address order.
pub unsafe trait MemorySource {
  /// Grows the source by `delta` bytes and returns the start of the new range,
  /// or `None` when no more memory is available.
  fn extend(
    &mut self,
    delta: usize,
  ) -> Option<NonNull<u8>>;
}

/// Moves the program break with `sbrk(2)`.
///
/// The break is padded up to a word boundary first, so foreign `sbrk` users
/// may leave gaps between blocks but never misalign them.
#[derive(Debug, Default)]
pub struct Sbrk;

unsafe impl MemorySource for Sbrk {
  fn extend(
    &mut self,
    delta: usize,
  ) -> Option<NonNull<u8>> {
    unsafe {
      let current = sbrk(0) as usize;
      let padding = align!(current) - current;
      let increment: intptr_t = delta.checked_add(padding)?.try_into().ok()?;

      let previous = sbrk(increment);

      if previous == usize::MAX as *mut c_void {
        return None;
      }

      let start = align!(previous as usize);
      if start - previous as usize > padding {
        // The break moved between the two calls and the padding no longer fits.
        log::warn!("program break moved under us, dropping {increment} bytes");
        return None;
      }

      NonNull::new(start as *mut u8)
    }
  }
}

/// A fixed-capacity, zero-filled buffer handed out front to back.
///
/// Useful for bounded heaps and for tests that need several independent
/// heaps, or a source that runs dry on purpose.
pub struct Region {
  base: NonNull<usize>,
  words: usize,
  used: usize,
}

impl Region {
  /// Reserves `capacity` bytes, rounded up to whole words.
  pub fn new(capacity: usize) -> Self {
    let words = align!(capacity) / WORD;
    let buffer: Box<[usize]> = vec![0usize; words].into_boxed_slice();
    let base = NonNull::from(Box::leak(buffer)).cast::<usize>();
    Self {
      base,
      words,
      used: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.words * WORD
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.used
  }

  pub fn contains(
    &self,
    addr: usize,
  ) -> bool {
    let start = self.base.as_ptr() as usize;
    addr >= start && addr < start + self.capacity()
  }
}

impl fmt::Debug for Region {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Region")
      .field("base", &self.base)
      .field("used", &self.used)
      .field("capacity", &self.capacity())
      .finish()
  }
}

unsafe impl MemorySource for Region {
  fn extend(
    &mut self,
    delta: usize,
  ) -> Option<NonNull<u8>> {
    let delta = crate::align::checked_align(delta)?;
    if delta > self.capacity() - self.used {
      return None;
    }

    // SAFETY: `used + delta` is within the buffer.
    let start = unsafe { self.base.cast::<u8>().add(self.used) };
    self.used += delta;
    Some(start)
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    let slice = ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.words);
    // SAFETY: `base` came from `Box::leak` of a slice of exactly `words` words.
    drop(unsafe { Box::from_raw(slice) });
  }
}
