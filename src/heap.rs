use core::{ops::Range, ptr::NonNull};

use crate::{
  HeapConfig, HeapError,
  align::checked_align,
  block::{BlockRef, HEADER, Tag},
  error::fatal,
  raw,
  source::{MemorySource, Sbrk},
};

/// A block-structured heap with first-fit reuse, splitting, eager
/// coalescing and a conservative mark-and-sweep collector
/// (see [`Heap::collect`]).
///
/// The heap owns every byte it ever obtained from its [`MemorySource`] and
/// never gives any of it back. Blocks form a singly linked list in strictly
/// increasing address order:
///
/// ```text
///   first                                              last
///     │                                                  │
///     ▼                                                  ▼
///   ┌────────┬──────────┐ ┌────────┬──────┐ ┌────────┬────────────┐
///   │ header │ payload  │→│ header │ free │→│ header │  payload   │→ null
///   └────────┴──────────┘ └────────┴──────┘ └────────┴────────────┘
/// ```
///
/// Not thread safe: a heap is meant to be owned by exactly one thread.
pub struct Heap<S: MemorySource = Sbrk> {
  source: S,
  config: HeapConfig,
  first: Option<BlockRef>,
  last: Option<BlockRef>,
}

impl Heap<Sbrk> {
  /// A heap growing the program break, with the default configuration.
  pub fn new() -> Self {
    Self::with_source(Sbrk)
  }
}

impl Default for Heap<Sbrk> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: MemorySource> Heap<S> {
  pub fn with_source(source: S) -> Self {
    Self {
      source,
      config: HeapConfig::default(),
      first: None,
      last: None,
    }
  }

  pub fn with_config(
    source: S,
    config: HeapConfig,
  ) -> Result<Self, HeapError> {
    config.validate()?;
    Ok(Self {
      config,
      ..Self::with_source(source)
    })
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub(crate) fn blocks(&self) -> Blocks {
    Blocks { cursor: self.first }
  }

  /// The block new arena growth gets linked after.
  pub(crate) fn tail(&self) -> Option<BlockRef> {
    self.last
  }

  /// Addresses from the first header to the end of the last payload.
  pub(crate) fn span(&self) -> Option<Range<usize>> {
    Some(self.first?.addr()..self.last?.payload_end())
  }

  fn find_free_block(
    &self,
    size: usize,
  ) -> Option<BlockRef> {
    self.blocks().find(|b| b.is_free() && b.size() >= size)
  }

  /// Appends a new live block of `size` payload bytes at the end of the arena.
  fn request_space(
    &mut self,
    size: usize,
  ) -> Result<BlockRef, HeapError> {
    let total = size
      .checked_add(HEADER)
      .ok_or(HeapError::ResourceExhausted { requested: size })?;

    let Some(start) = self.source.extend(total) else {
      log::warn!("memory source refused {total} bytes");
      return Err(HeapError::ResourceExhausted { requested: total });
    };

    // SAFETY: the memory source hands out `total` aligned, writable bytes.
    let block = unsafe { BlockRef::init(start, size, false, Tag::Fresh) };

    match self.last {
      Some(last) => {
        if block.addr() < last.payload_end() {
          fatal(HeapError::violation(
            block.addr(),
            "memory source returned an address below the arena",
          ));
        }
        last.set_next(Some(block));
      }
      None => self.first = Some(block),
    }
    self.last = Some(block);

    log::debug!("arena grew by {total} bytes at {:#x}", block.addr());
    Ok(block)
  }

  /// Carves the tail of `block` off as a free remainder, when the remainder
  /// would have at least `min_split` bytes of payload.
  fn split(
    &mut self,
    block: BlockRef,
    size: usize,
  ) {
    let threshold = size
      .saturating_add(HEADER)
      .saturating_add(self.config.min_split);
    if block.size() < threshold {
      return;
    }

    let remaining = block.size() - size - HEADER;
    // SAFETY: the remainder header and payload lie inside `block`'s payload.
    let remainder = unsafe {
      BlockRef::init(
        block.payload().add(size),
        remaining,
        true,
        Tag::SplitRemainder,
      )
    };
    remainder.set_next(block.next());
    block.set_next(Some(remainder));
    block.set_size(size);

    if self.last == Some(block) {
      self.last = Some(remainder);
    }

    log::debug!("split {:#x}: kept {size} bytes, {remaining} bytes remain free", block.addr());
  }

  /// Allocates `size` bytes, rounded up to whole words.
  ///
  /// The first free block large enough is reused, split when the leftover
  /// is worth keeping; otherwise the arena grows.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    if size == 0 {
      return Err(HeapError::InvalidArgument);
    }
    let size = checked_align(size).ok_or(HeapError::ResourceExhausted { requested: size })?;

    let block = match self.find_free_block(size) {
      Some(block) => {
        self.split(block, size);
        if let Err(err) = block.transition(Tag::Reused) {
          fatal(err);
        }
        block
      }
      None => self.request_space(size)?,
    };

    Ok(block.payload())
  }

  /// Finds the live block whose payload starts at `ptr`.
  fn live_block(
    &self,
    ptr: NonNull<u8>,
  ) -> Result<BlockRef, HeapError> {
    let addr = ptr.as_ptr() as usize;
    let block = self
      .blocks()
      .take_while(|b| b.addr() < addr)
      .find(|b| b.payload_start() == addr)
      .ok_or(HeapError::violation(addr, "pointer is not a block of this heap"))?;

    match block.tag() {
      Some(tag) if tag.is_live() && !block.is_free() => Ok(block),
      Some(_) => Err(HeapError::violation(addr, "block is not a live allocation")),
      None => Err(HeapError::violation(addr, "unrecognized block tag")),
    }
  }

  /// Whether `ptr` is the payload of a block that is currently allocated.
  pub fn is_live(
    &self,
    ptr: NonNull<u8>,
  ) -> bool {
    self.live_block(ptr).is_ok()
  }

  /// Recorded payload size of a live allocation.
  pub fn size_of(
    &self,
    ptr: NonNull<u8>,
  ) -> Result<usize, HeapError> {
    self.live_block(ptr).map(BlockRef::size)
  }

  /// Returns a block to the heap and merges every run of adjacent free blocks.
  ///
  /// # Panics
  ///
  /// Panics if `ptr` is not a live allocation of this heap: a double release,
  /// a pointer the heap never handed out, or a header that was overwritten.
  pub fn release(
    &mut self,
    ptr: NonNull<u8>,
  ) {
    let block = self
      .live_block(ptr)
      .and_then(|block| block.transition(Tag::Released).map(|_| block));
    if let Err(err) = block {
      fatal(err);
    }

    self.coalesce();
  }

  /// Resizes an allocation.
  ///
  /// `None` allocates, a zero `size` releases and yields `Ok(None)`. A block
  /// that is already big enough is returned as is, never shrunk. Otherwise the
  /// contents move to a new block; if that allocation fails the old block is
  /// left untouched.
  ///
  /// # Panics
  ///
  /// Same as [`Heap::release`].
  pub fn reallocate(
    &mut self,
    ptr: Option<NonNull<u8>>,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, HeapError> {
    let Some(ptr) = ptr else {
      return self.allocate(size).map(Some);
    };

    if size == 0 {
      self.release(ptr);
      return Ok(None);
    }

    let old = self.live_block(ptr).unwrap_or_else(|err| fatal(err));
    if old.size() >= size {
      return Ok(Some(ptr));
    }

    let moved = self.allocate(size)?;
    // SAFETY: both are live payloads, which never overlap, and neither is
    // shorter than the copied length.
    unsafe { raw::copy_payload(ptr, moved, old.size().min(size)) };
    self.release(ptr);

    Ok(Some(moved))
  }

  /// Merges every free block with a free, address-contiguous successor.
  /// Returns how many headers were absorbed.
  pub(crate) fn coalesce(&mut self) -> usize {
    let mut merged = 0;
    let mut cursor = self.first;

    while let Some(block) = cursor {
      match block.next() {
        Some(next) if block.is_free() && next.is_free() && block.payload_end() == next.addr() => {
          block.set_size(block.size() + HEADER + next.size());
          block.set_next(next.next());
          next.scrub();
          if self.last == Some(next) {
            self.last = Some(block);
          }
          merged += 1;
          // Stay on `block`: its new successor may be free too.
        }
        next => cursor = next,
      }
    }

    if merged > 0 {
      log::debug!("coalesced {merged} free blocks");
    }
    merged
  }

  /// Number of blocks currently handed out.
  pub fn count_allocated(&self) -> usize {
    self.blocks().filter(|b| !b.is_free()).count()
  }

  /// Number of free blocks in the arena.
  pub fn count_free(&self) -> usize {
    self.blocks().filter(|b| b.is_free()).count()
  }
}

/// Walks the block list front to back.
pub(crate) struct Blocks {
  cursor: Option<BlockRef>,
}

impl Iterator for Blocks {
  type Item = BlockRef;

  fn next(&mut self) -> Option<BlockRef> {
    let block = self.cursor?;
    self.cursor = block.next();
    Some(block)
  }
}
