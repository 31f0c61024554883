//! Helpers shared by the unit tests.

use std::{ptr::NonNull, sync::Mutex};

use crate::{Heap, MemorySource, Region};

/// Serializes tests that move the real program break.
pub static SBRK: Mutex<()> = Mutex::new(());

pub fn init() {
  let _ = env_logger::builder().is_test(true).try_init();
}

pub fn heap(capacity: usize) -> Heap<Region> {
  init();
  Heap::with_source(Region::new(capacity))
}

pub fn assert_filled(
  ptr: NonNull<u8>,
  len: usize,
  fill: u8,
) {
  let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };
  assert!(bytes.iter().all(|&b| b == fill), "payload at {ptr:?} was clobbered");
}

/// Panics if any two of the `(payload, len)` ranges overlap.
pub fn assert_disjoint(ranges: impl IntoIterator<Item = (NonNull<u8>, usize)>) {
  let mut ranges: Vec<(usize, usize)> = ranges
    .into_iter()
    .map(|(ptr, len)| (ptr.as_ptr() as usize, ptr.as_ptr() as usize + len))
    .collect();
  ranges.sort_unstable();
  for pair in ranges.windows(2) {
    assert!(pair[0].1 <= pair[1].0, "payloads {pair:x?} overlap");
  }
}

pub fn assert_no_adjacent_free<S: MemorySource>(heap: &Heap<S>) {
  for block in heap.blocks() {
    if let Some(next) = block.next() {
      assert!(
        !(block.is_free() && next.is_free() && block.payload_end() == next.addr()),
        "adjacent free blocks {block:?} and {next:?}"
      );
    }
  }
}

pub fn assert_consistent<S: MemorySource>(heap: &Heap<S>) {
  if let Err(err) = heap.verify() {
    panic!("heap inconsistent: {err}");
  }
}
