//! # markalloc - A Self-Contained Heap with a Conservative Collector
//!
//! This crate provides a block-structured memory allocator that grows its
//! arena with `sbrk(2)` (or any other [`MemorySource`]) and reclaims
//! unreachable blocks with a **conservative mark-and-sweep** collector.
//!
//! ## Overview
//!
//! ```text
//!   Arena (only ever grows, so blocks stay in address order):
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ ┌──┬──────┐ ┌──┬────────────┐ ┌──┬────┐ ┌──┬──────────┐              │
//!   │ │H │ live │→│H │    free    │→│H │live│→│H │   live   │→ null        │
//!   │ └──┴──────┘ └──┴────────────┘ └──┴────┘ └──┴──────────┘              │
//!   │                                                             ▲        │
//!   │                                                             │        │
//!   │                                                        Program Break │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   allocate:  first free block that fits, split if the tail is big enough,
//!              otherwise grow the arena
//!   release:   mark free, then merge every run of contiguous free blocks
//!   collect:   scan roots → mark transitively → sweep unmarked blocks
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   markalloc
//!   ├── align      - Alignment macros (align!, align_down!)
//!   ├── block      - Block header, lifecycle tags (internal)
//!   ├── raw        - Raw word access for scanning (internal)
//!   ├── source     - MemorySource, Sbrk, Region
//!   ├── heap       - Heap: allocate / release / reallocate
//!   ├── collector  - Heap::collect
//!   ├── roots      - RootSource, RootRegions
//!   ├── platform   - ProcessRoots, current_stack_top
//!   ├── diag       - HeapStats, HeapDump
//!   ├── config     - HeapConfig
//!   └── error      - HeapError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use markalloc::{Heap, Region, RootRegions};
//!
//! let mut heap = Heap::with_source(Region::new(4096));
//!
//! let kept = heap.allocate(32).unwrap();
//! let dropped = heap.allocate(32).unwrap();
//!
//! // Only `kept` is reachable from the roots.
//! let stack = [kept.as_ptr() as usize];
//! let stats = heap.collect(&RootRegions::from_slices(&[], &stack));
//!
//! assert_eq!(stats.freed, 1);
//! assert!(heap.is_live(kept));
//! assert!(!heap.is_live(dropped));
//! ```
//!
//! ## Block Layout
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         Payload                │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ next: ptr/null  │  │  │                          │  │
//!   │  │ free, marked    │  │  │  N bytes, word aligned   │  │
//!   │  │ tag             │  │  │                          │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a `Heap` is neither `Send` nor `Sync`
//! - **Never shrinks**: memory is not given back to the OS
//! - **Conservative**: any word that looks like a pointer into a payload
//!   keeps that block alive
//! - **Quadratic marking**: fine for small heaps, slow for large ones
//! - **Collected blocks are merged lazily**: free neighbours produced by a
//!   sweep are only coalesced on the next `release`

pub mod align;
mod block;
mod collector;
mod config;
mod diag;
mod error;
mod heap;
pub mod platform;
mod raw;
mod roots;
mod source;
#[cfg(test)]
mod testing;

pub use align::WORD;
pub use block::{HEADER, Tag};
pub use collector::CollectStats;
pub use config::HeapConfig;
pub use diag::{BlockInfo, HeapDump, HeapStats};
pub use error::HeapError;
pub use heap::Heap;
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub use platform::ProcessRoots;
pub use roots::{RootRegions, RootSource};
pub use source::{MemorySource, Region, Sbrk};
