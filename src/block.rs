use core::{fmt, mem, ptr::NonNull};

use crate::{HeapError, WORD};

/// Header written in front of every payload in the arena.
///
/// `tag` is stored as a raw `u32` rather than a [`Tag`]: header memory can be
/// scribbled over by a buggy caller, and every read has to survive that.
#[repr(C)]
pub(crate) struct Header {
  size: usize,
  next: *mut Header,
  free: bool,
  marked: bool,
  tag: u32,
}

/// Bytes taken by a header. Payloads start right after it.
pub const HEADER: usize = mem::size_of::<Header>();

const _: () = assert!(HEADER % WORD == 0);
const _: () = assert!(mem::align_of::<Header>() <= WORD);

/// Lifecycle state recorded in a block header.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
  /// Live, carved from fresh arena growth.
  Fresh = 0x1234_5678,
  /// Live, recycled from a free block.
  Reused = 0x7777_7777,
  /// Free tail split off a larger block.
  SplitRemainder = 0x2222_2222,
  /// Free, returned by `release`.
  Released = 0x5555_5555,
  /// Free, reclaimed by the sweep.
  Collected = 0x5a5a_5a5a,
}

impl Tag {
  /// Decodes a raw header tag. `None` means the header is corrupted.
  pub fn decode(raw: u32) -> Option<Tag> {
    match raw {
      0x1234_5678 => Some(Tag::Fresh),
      0x7777_7777 => Some(Tag::Reused),
      0x2222_2222 => Some(Tag::SplitRemainder),
      0x5555_5555 => Some(Tag::Released),
      0x5a5a_5a5a => Some(Tag::Collected),
      _ => None,
    }
  }

  pub fn is_live(self) -> bool {
    matches!(self, Tag::Fresh | Tag::Reused)
  }

  /// Whether a block tagged `self` may move to `next`.
  ///
  /// `Fresh` and `SplitRemainder` are only ever written when a header is
  /// created, never reached through a transition.
  pub fn can_become(
    self,
    next: Tag,
  ) -> bool {
    match next {
      Tag::Reused => !self.is_live(),
      Tag::Released | Tag::Collected => self.is_live(),
      Tag::Fresh | Tag::SplitRemainder => false,
    }
  }
}

impl fmt::Display for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let name = match self {
      Tag::Fresh => "fresh",
      Tag::Reused => "reused",
      Tag::SplitRemainder => "split",
      Tag::Released => "released",
      Tag::Collected => "collected",
    };
    f.pad(name)
  }
}

/// Typed handle to a header inside the arena.
///
/// A `BlockRef` is only ever built over a header the heap itself wrote (through
/// [`BlockRef::init`]) or reached by following `next` links from one, so the
/// accessors below can dereference it without further checks.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockRef(NonNull<Header>);

impl BlockRef {
  /// Writes a fresh, unlinked header at `at`.
  ///
  /// # Safety
  ///
  /// `at` must be word-aligned and `HEADER + size` writable bytes must start there.
  pub unsafe fn init(
    at: NonNull<u8>,
    size: usize,
    free: bool,
    tag: Tag,
  ) -> Self {
    let header = at.cast::<Header>();
    // SAFETY: guaranteed by the caller.
    unsafe {
      header.as_ptr().write(Header {
        size,
        next: core::ptr::null_mut(),
        free,
        marked: false,
        tag: tag as u32,
      });
    }
    BlockRef(header)
  }

  /// Recovers the handle for a payload pointer.
  ///
  /// # Safety
  ///
  /// `payload - HEADER` must be a readable, aligned header slot inside the arena.
  pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    // SAFETY: guaranteed by the caller.
    let header = unsafe { payload.as_ptr().sub(HEADER) };
    BlockRef(unsafe { NonNull::new_unchecked(header.cast::<Header>()) })
  }

  fn raw(self) -> *mut Header {
    self.0.as_ptr()
  }

  pub fn addr(self) -> usize {
    self.raw() as usize
  }

  pub fn payload(self) -> NonNull<u8> {
    // SAFETY: the payload directly follows a valid header.
    unsafe { NonNull::new_unchecked(self.raw().cast::<u8>().add(HEADER)) }
  }

  pub fn payload_start(self) -> usize {
    self.addr() + HEADER
  }

  pub fn payload_end(self) -> usize {
    self.payload_start() + self.size()
  }

  /// Whether `addr` falls inside this block's payload range.
  pub fn contains(
    self,
    addr: usize,
  ) -> bool {
    addr >= self.payload_start() && addr < self.payload_end()
  }

  pub fn size(self) -> usize {
    unsafe { (*self.raw()).size }
  }

  pub fn set_size(
    self,
    size: usize,
  ) {
    unsafe { (*self.raw()).size = size }
  }

  pub fn next(self) -> Option<BlockRef> {
    NonNull::new(unsafe { (*self.raw()).next }).map(BlockRef)
  }

  pub fn set_next(
    self,
    next: Option<BlockRef>,
  ) {
    let next = next.map_or(core::ptr::null_mut(), |b| b.raw());
    unsafe { (*self.raw()).next = next }
  }

  pub fn is_free(self) -> bool {
    unsafe { (*self.raw()).free }
  }

  pub fn is_marked(self) -> bool {
    unsafe { (*self.raw()).marked }
  }

  pub fn set_marked(
    self,
    marked: bool,
  ) {
    unsafe { (*self.raw()).marked = marked }
  }

  pub fn raw_tag(self) -> u32 {
    unsafe { (*self.raw()).tag }
  }

  pub fn tag(self) -> Option<Tag> {
    Tag::decode(self.raw_tag())
  }

  /// Moves the block to `next`, checking the tag it currently carries.
  ///
  /// The free flag follows the tag; the mark flag is always cleared.
  pub fn transition(
    self,
    next: Tag,
  ) -> Result<(), HeapError> {
    let current = self
      .tag()
      .ok_or(HeapError::violation(self.payload_start(), "unrecognized block tag"))?;

    if !current.can_become(next) {
      return Err(HeapError::violation(
        self.payload_start(),
        if current.is_live() {
          "block is already live"
        } else {
          "block is not a live allocation"
        },
      ));
    }
    if self.is_free() == next.is_live() {
      unsafe {
        (*self.raw()).free = !next.is_live();
        (*self.raw()).marked = false;
        (*self.raw()).tag = next as u32;
      }
      return Ok(());
    }

    Err(HeapError::violation(self.payload_start(), "free flag disagrees with tag"))
  }

  /// Wipes the tag of a header that has been merged into its predecessor, so
  /// a stale pointer to it no longer passes validation.
  pub fn scrub(self) {
    unsafe { (*self.raw()).tag = 0 }
  }
}

impl fmt::Debug for BlockRef {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "Block({:#x}, {})", self.addr(), self.size())
  }
}
