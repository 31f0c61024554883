use core::fmt;

use crate::{Heap, HeapError, MemorySource, Tag};

/// Block and byte counts for a heap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub allocated_blocks: usize,
  pub free_blocks: usize,
  pub allocated_bytes: usize,
  pub free_bytes: usize,
}

impl fmt::Display for HeapStats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "[Allocated: {} blocks | Free: {} blocks]",
      self.allocated_blocks, self.free_blocks
    )
  }
}

/// Snapshot of one block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub addr: usize,
  pub size: usize,
  pub free: bool,
  pub marked: bool,
  pub tag: Tag,
}

/// The first few blocks of a heap, as walked by [`Heap::dump`].
#[derive(Debug, Clone, Default)]
pub struct HeapDump {
  pub blocks: Vec<BlockInfo>,
  /// Address and raw tag of the header that stopped the walk.
  pub corrupted: Option<(usize, u32)>,
  /// The walk hit the configured block limit before the end of the list.
  pub truncated: bool,
}

impl HeapDump {
  pub fn check(&self) -> Result<(), HeapError> {
    match self.corrupted {
      Some((addr, tag)) => Err(HeapError::Corrupted { addr, tag }),
      None => Ok(()),
    }
  }
}

impl fmt::Display for HeapDump {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "{:<18} {:<8} {:<6} {:<8} {:<10}", "Address", "Size", "Free", "Marked", "Tag")?;
    for block in &self.blocks {
      writeln!(
        f,
        "{:<#18x} {:<8} {:<6} {:<8} {:<10}",
        block.addr, block.size, block.free, block.marked, block.tag
      )?;
    }
    if let Some((addr, tag)) = self.corrupted {
      writeln!(f, "{addr:<#18x} [CORRUPTED - tag: {tag:#010x}]")?;
    }
    if self.truncated {
      writeln!(f, "  (stopped after {} blocks)", self.blocks.len())?;
    }
    Ok(())
  }
}

impl<S: MemorySource> Heap<S> {
  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(HeapStats::default(), |mut stats, block| {
      if block.is_free() {
        stats.free_blocks += 1;
        stats.free_bytes += block.size();
      } else {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += block.size();
      }
      stats
    })
  }

  /// Walks at most `dump_limit` blocks, stopping at the first header whose
  /// tag is not recognized.
  pub fn dump(&self) -> HeapDump {
    let mut dump = HeapDump::default();

    for block in self.blocks() {
      if dump.blocks.len() == self.config().dump_limit {
        dump.truncated = true;
        break;
      }
      let Some(tag) = block.tag() else {
        dump.corrupted = Some((block.addr(), block.raw_tag()));
        break;
      };
      dump.blocks.push(BlockInfo {
        addr: block.addr(),
        size: block.size(),
        free: block.is_free(),
        marked: block.is_marked(),
        tag,
      });
    }

    dump
  }

  /// Checks every header: known tag, free flag agreeing with the tag, and
  /// strictly increasing, non-overlapping blocks. The tail cursor must point
  /// at the last block of the list.
  pub fn verify(&self) -> Result<(), HeapError> {
    let mut last = None;
    for block in self.blocks() {
      last = Some(block);
      let corrupted = HeapError::Corrupted {
        addr: block.addr(),
        tag: block.raw_tag(),
      };
      let Some(tag) = block.tag() else {
        return Err(corrupted);
      };
      if tag.is_live() == block.is_free() {
        return Err(corrupted);
      }
      if let Some(next) = block.next() {
        if next.addr() < block.payload_end() {
          return Err(corrupted);
        }
      }
    }

    if last != self.tail() {
      let addr = self.tail().map_or(0, |b| b.addr());
      return Err(HeapError::violation(addr, "tail cursor is not the last block"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{HeapConfig, Region, WORD, block::BlockRef, testing};

  #[test]
  fn test_stats() {
    let mut heap = testing::heap(256 * WORD);
    let a = heap.allocate(2 * WORD).unwrap();
    let _b = heap.allocate(3 * WORD).unwrap();
    heap.release(a);

    let stats = heap.stats();

    assert_eq!(stats.allocated_blocks, heap.count_allocated());
    assert_eq!(stats.free_blocks, heap.count_free());
    assert_eq!(stats.allocated_bytes, 3 * WORD);
    assert_eq!(stats.free_bytes, 2 * WORD);
    assert_eq!(stats.to_string(), "[Allocated: 1 blocks | Free: 1 blocks]");
  }

  #[test]
  fn test_dump_lists_blocks_in_order() {
    let mut heap = testing::heap(256 * WORD);
    let a = heap.allocate(WORD).unwrap();
    heap.allocate(WORD).unwrap();
    heap.release(a);

    let dump = heap.dump();

    assert!(dump.check().is_ok());
    assert!(!dump.truncated);
    assert_eq!(dump.blocks.len(), 2);
    assert!(dump.blocks[0].addr < dump.blocks[1].addr);
    assert_eq!(dump.blocks[0].tag, Tag::Released);
    assert_eq!(dump.blocks[1].tag, Tag::Fresh);
    assert!(dump.to_string().contains("released"));
  }

  #[test]
  fn test_dump_stops_at_limit() {
    let config = HeapConfig {
      dump_limit: 3,
      ..HeapConfig::default()
    };
    let mut heap = Heap::with_config(Region::new(256 * WORD), config).unwrap();
    for _ in 0..5 {
      heap.allocate(WORD).unwrap();
    }

    let dump = heap.dump();

    assert!(dump.truncated);
    assert_eq!(dump.blocks.len(), 3);
    assert!(dump.to_string().contains("stopped after 3 blocks"));
  }

  #[test]
  fn test_dump_stops_at_corruption() {
    let mut heap = testing::heap(256 * WORD);
    heap.allocate(WORD).unwrap();
    let bad = heap.allocate(WORD).unwrap();
    heap.allocate(WORD).unwrap();
    unsafe { BlockRef::from_payload(bad) }.scrub();

    let dump = heap.dump();

    assert_eq!(dump.blocks.len(), 1);
    assert!(matches!(dump.check(), Err(HeapError::Corrupted { tag: 0, .. })));
    assert!(dump.to_string().contains("CORRUPTED"));
    assert!(heap.verify().is_err());
  }
}
