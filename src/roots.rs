use core::{marker::PhantomData, ops::Range};

/// Supplies the regions a collection cycle scans for roots.
///
/// # Safety
///
/// Every address in `static_data_bounds()` and in
/// `current_stack_top()..stack_base()` must be mapped and readable whenever
/// [`Heap::collect`](crate::Heap::collect) is running.
pub unsafe trait RootSource {
  /// Bounds of the static/global data segment.
  fn static_data_bounds(&self) -> Range<usize>;

  /// Highest address of the stack, fixed for the life of the source.
  fn stack_base(&self) -> usize;

  /// Lowest live stack address, sampled at each collection.
  fn current_stack_top(&self) -> usize;

  /// The stack extent to scan. Stacks grow down, so this runs from the
  /// current top up to the base; an inverted extent is empty.
  fn stack_extent(&self) -> Range<usize> {
    let top = self.current_stack_top();
    let base = self.stack_base();
    if top <= base { top..base } else { base..base }
  }
}

/// Root regions given explicitly by the caller.
#[derive(Debug, Clone)]
pub struct RootRegions<'a> {
  statics: Range<usize>,
  stack: Range<usize>,
  _memory: PhantomData<&'a [usize]>,
}

impl<'a> RootRegions<'a> {
  /// Roots made of two raw address ranges.
  ///
  /// # Safety
  ///
  /// Both ranges must stay mapped and readable for `'a`.
  pub unsafe fn new(
    statics: Range<usize>,
    stack: Range<usize>,
  ) -> Self {
    Self {
      statics,
      stack,
      _memory: PhantomData,
    }
  }

  /// Roots made of the memory behind two slices of words.
  pub fn from_slices(
    statics: &'a [usize],
    stack: &'a [usize],
  ) -> Self {
    // SAFETY: both slices are borrowed for `'a`.
    unsafe { Self::new(slice_range(statics), slice_range(stack)) }
  }

  /// No roots at all: a collection frees every live block.
  pub fn empty() -> Self {
    // SAFETY: empty ranges are never read.
    unsafe { Self::new(0..0, 0..0) }
  }
}

fn slice_range(words: &[usize]) -> Range<usize> {
  let range = words.as_ptr_range();
  range.start as usize..range.end as usize
}

// SAFETY: the ranges are readable for `'a` by construction.
unsafe impl RootSource for RootRegions<'_> {
  fn static_data_bounds(&self) -> Range<usize> {
    self.statics.clone()
  }

  fn stack_base(&self) -> usize {
    self.stack.end
  }

  fn current_stack_top(&self) -> usize {
    self.stack.start
  }
}
