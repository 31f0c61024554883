//! Conservative mark-and-sweep over the block list.
//!
//! ```text
//!   reset      every mark flag cleared
//!     │
//!   roots      static data + stack, word by word: any word that lands in a
//!     │        block payload marks that block
//!     │
//!   closure    rescan the payloads of marked blocks until a full pass
//!     │        marks nothing new
//!     │
//!   sweep      unmarked live blocks become free (no coalescing)
//! ```
//!
//! Nothing here knows the types stored in the heap, so any word whose value
//! happens to fall inside a payload keeps that block alive. Free blocks are
//! marked and scanned like any other; the sweep simply leaves them free.

use core::ops::Range;

use crate::{
  Heap, MemorySource, RootSource,
  block::{BlockRef, Tag},
  error::fatal,
  raw,
};

/// Outcome of one [`Heap::collect`] cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectStats {
  /// Blocks found reachable.
  pub marked: usize,
  /// Blocks turned free by the sweep.
  pub freed: usize,
  /// Passes the transitive closure needed to reach its fixpoint.
  pub passes: usize,
}

impl<S: MemorySource> Heap<S> {
  /// Runs a full collection cycle against the given roots.
  ///
  /// Reclaimed blocks are not merged with their free neighbours; that only
  /// happens on the next [`Heap::release`].
  pub fn collect<R: RootSource + ?Sized>(
    &mut self,
    roots: &R,
  ) -> CollectStats {
    let Some(span) = self.span() else {
      return CollectStats::default();
    };

    self.reset_marks();

    let mut stats = CollectStats::default();
    // SAFETY: `RootSource` implementors vouch for both regions.
    stats.marked += unsafe { self.mark_region(roots.static_data_bounds(), &span) };
    stats.marked += unsafe { self.mark_region(roots.stack_extent(), &span) };

    let (reached, passes) = self.close_marks(&span);
    stats.marked += reached;
    stats.passes = passes;

    stats.freed = self.sweep();

    log::info!(
      "collected: {} reachable, {} freed, closure took {} passes",
      stats.marked,
      stats.freed,
      stats.passes
    );
    stats
  }

  fn reset_marks(&self) {
    for block in self.blocks() {
      block.set_marked(false);
    }
  }

  /// The block whose payload contains `addr`, if any.
  fn block_containing(
    &self,
    addr: usize,
  ) -> Option<BlockRef> {
    self
      .blocks()
      .take_while(|b| b.addr() < addr)
      .find(|b| b.contains(addr))
  }

  /// Marks the block `word` points into. Returns whether it was newly marked.
  fn mark_candidate(
    &self,
    word: usize,
    span: &Range<usize>,
  ) -> bool {
    if !span.contains(&word) {
      return false;
    }
    match self.block_containing(word) {
      Some(block) if !block.is_marked() => {
        block.set_marked(true);
        log::trace!("marked {block:?} via {word:#x}");
        true
      }
      _ => false,
    }
  }

  /// # Safety
  ///
  /// `region` must be readable.
  unsafe fn mark_region(
    &self,
    region: Range<usize>,
    span: &Range<usize>,
  ) -> usize {
    let words = unsafe { raw::words(region) };
    words.filter(|&word| self.mark_candidate(word, span)).count()
  }

  /// Marks everything reachable from already marked blocks.
  ///
  /// Every pass rescans every marked payload against the whole list; this is
  /// quadratic and only meant for small heaps.
  fn close_marks(
    &self,
    span: &Range<usize>,
  ) -> (usize, usize) {
    let mut reached = 0;
    let mut passes = 0;

    loop {
      passes += 1;
      let mut progress = 0;

      for block in self.blocks().filter(|b| b.is_marked()) {
        // SAFETY: a block payload lies inside the arena.
        let words = unsafe { raw::words(block.payload_start()..block.payload_end()) };
        progress += words.filter(|&word| self.mark_candidate(word, span)).count();
      }

      reached += progress;
      if progress == 0 {
        return (reached, passes);
      }
    }
  }

  fn sweep(&mut self) -> usize {
    let mut freed = 0;
    for block in self.blocks() {
      if !block.is_marked() && !block.is_free() {
        if let Err(err) = block.transition(Tag::Collected) {
          fatal(err);
        }
        freed += 1;
      }
    }
    freed
  }
}

#[cfg(test)]
mod tests {
  use core::ptr::NonNull;

  use super::*;
  use crate::{HEADER, RootRegions, WORD, testing};

  const NO_STATICS: [usize; 0] = [];

  fn store(
    slot: NonNull<u8>,
    value: NonNull<u8>,
  ) {
    unsafe { slot.cast::<usize>().as_ptr().write(value.as_ptr() as usize) };
  }

  #[test]
  fn test_empty_heap_collects_nothing() {
    let mut heap = testing::heap(64 * WORD);

    let stats = heap.collect(&RootRegions::empty());

    assert_eq!(stats, CollectStats::default());
  }

  #[test]
  fn test_reachable_through_heap_survives() {
    let mut heap = testing::heap(256 * WORD);
    let a = heap.allocate(4 * WORD).unwrap();
    let b = heap.allocate(4 * WORD).unwrap();
    let c = heap.allocate(4 * WORD).unwrap();
    store(b, a);

    let stack = [b.as_ptr() as usize];
    let stats = heap.collect(&RootRegions::from_slices(&NO_STATICS, &stack));

    assert!(heap.is_live(a));
    assert!(heap.is_live(b));
    assert!(!heap.is_live(c));
    assert_eq!(stats.marked, 2);
    assert_eq!(stats.freed, 1);
    testing::assert_consistent(&heap);
  }

  #[test]
  fn test_long_chain_survives() {
    let mut heap = testing::heap(1024 * WORD);
    let target = heap.allocate(2 * WORD).unwrap();
    let mut link = target;
    for _ in 0..8 {
      let holder = heap.allocate(2 * WORD).unwrap();
      // An interior pointer is as good as one to the payload start.
      store(unsafe { holder.add(WORD) }, unsafe { link.add(WORD) });
      link = holder;
    }
    let stray = heap.allocate(2 * WORD).unwrap();

    let stack = [link.as_ptr() as usize];
    let stats = heap.collect(&RootRegions::from_slices(&NO_STATICS, &stack));

    assert!(heap.is_live(target));
    assert!(!heap.is_live(stray));
    assert_eq!(stats.marked, 9);
    assert_eq!(heap.count_allocated(), 9);
    assert!(stats.passes >= 2);
  }

  #[test]
  fn test_static_roots_are_scanned() {
    let mut heap = testing::heap(64 * WORD);
    let kept = heap.allocate(WORD).unwrap();
    let lost = heap.allocate(WORD).unwrap();

    let statics = [0, kept.as_ptr() as usize + 3];
    let stack: [usize; 0] = [];
    heap.collect(&RootRegions::from_slices(&statics, &stack));

    assert!(heap.is_live(kept));
    assert!(!heap.is_live(lost));
  }

  #[test]
  fn test_no_roots_frees_everything() {
    let mut heap = testing::heap(64 * WORD);
    for _ in 0..4 {
      heap.allocate(2 * WORD).unwrap();
    }

    let stats = heap.collect(&RootRegions::empty());

    assert_eq!(stats.freed, 4);
    assert_eq!(heap.count_allocated(), 0);
  }

  #[test]
  fn test_header_address_is_not_a_reference() {
    let mut heap = testing::heap(64 * WORD);
    let only = heap.allocate(2 * WORD).unwrap();

    let stack = [only.as_ptr() as usize - HEADER];
    heap.collect(&RootRegions::from_slices(&NO_STATICS, &stack));

    assert!(!heap.is_live(only));
  }

  #[test]
  fn test_root_into_free_block_keeps_its_referents() {
    let mut heap = testing::heap(64 * WORD);
    let gone = heap.allocate(2 * WORD).unwrap();
    let referent = heap.allocate(2 * WORD).unwrap();
    let stray = heap.allocate(WORD).unwrap();
    store(gone, referent);
    heap.release(gone);

    let stack = [gone.as_ptr() as usize];
    let stats = heap.collect(&RootRegions::from_slices(&NO_STATICS, &stack));

    assert!(heap.is_live(referent));
    assert!(!heap.is_live(stray));
    assert_eq!(stats.marked, 2);
    assert_eq!(stats.freed, 1);
    // Marking never turns a free block back into an allocation.
    assert!(!heap.is_live(gone));
    assert_eq!(heap.count_allocated(), 1);
    testing::assert_consistent(&heap);
  }

  #[test]
  fn test_collect_is_idempotent() {
    let mut heap = testing::heap(256 * WORD);
    let ptrs: Vec<_> = (0..6).map(|_| heap.allocate(2 * WORD).unwrap()).collect();
    store(ptrs[1], ptrs[4]);

    let stack = [ptrs[1].as_ptr() as usize, ptrs[3].as_ptr() as usize];
    let roots = RootRegions::from_slices(&NO_STATICS, &stack);

    heap.collect(&roots);
    let first: Vec<bool> = ptrs.iter().map(|&p| heap.is_live(p)).collect();
    let again = heap.collect(&roots);
    let second: Vec<bool> = ptrs.iter().map(|&p| heap.is_live(p)).collect();

    assert_eq!(first, vec![false, true, false, true, true, false]);
    assert_eq!(first, second);
    assert_eq!(again.freed, 0);
  }

  #[test]
  fn test_sweep_does_not_coalesce() {
    let mut heap = testing::heap(256 * WORD);
    let a = heap.allocate(2 * WORD).unwrap();
    let b = heap.allocate(2 * WORD).unwrap();
    let kept = heap.allocate(2 * WORD).unwrap();
    let other = heap.allocate(2 * WORD).unwrap();

    let stack = [kept.as_ptr() as usize, other.as_ptr() as usize];
    heap.collect(&RootRegions::from_slices(&NO_STATICS, &stack));
    assert!(!heap.is_live(a) && !heap.is_live(b));
    assert_eq!(heap.count_free(), 2);

    heap.release(other);
    assert_eq!(heap.count_free(), 2);
    testing::assert_no_adjacent_free(&heap);
  }

  #[test]
  fn test_collected_block_is_reused() {
    let mut heap = testing::heap(64 * WORD);
    let lost = heap.allocate(4 * WORD).unwrap();
    let kept = heap.allocate(WORD).unwrap();

    let stack = [kept.as_ptr() as usize];
    heap.collect(&RootRegions::from_slices(&NO_STATICS, &stack));

    assert_eq!(heap.allocate(4 * WORD).unwrap(), lost);
  }

  #[test]
  #[should_panic(expected = "integrity violation")]
  fn test_releasing_collected_block_is_fatal() {
    let mut heap = testing::heap(64 * WORD);
    let lost = heap.allocate(WORD).unwrap();

    heap.collect(&RootRegions::empty());
    heap.release(lost);
  }
}
