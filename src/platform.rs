//! Root discovery for the running process.
//!
//! This is the portability seam of the collector: which symbols bound the
//! static data, where the stack starts, and how to read the current stack
//! pointer all differ per OS and per architecture. Only Linux/glibc is wired
//! up for the first two; the stack pointer is read on x86, x86_64 and
//! aarch64, with a best-effort fallback elsewhere.
//!
//! ```text
//!   High Address ┌─────────────────────┐ ← stack_base()
//!                │       Stack         │
//!                │ . . . . . . . . . . │ ← current_stack_top()
//!                │                     │
//!                ├─────────────────────┤
//!                │       Heap          │
//!                ├─────────────────────┤ ← _end
//!                │   .data + .bss      │
//!                ├─────────────────────┤ ← __data_start
//!   Low Address  │   Text, rodata      │
//!                └─────────────────────┘
//! ```

#[cfg(all(target_os = "linux", target_env = "gnu"))]
use core::ops::Range;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
use crate::{HeapError, RootSource};

/// Reads the stack pointer of the caller's frame.
///
/// Never inlined, so the frame of whoever calls this is entirely above the
/// returned address.
#[cfg(target_arch = "x86_64")]
#[inline(never)]
pub fn current_stack_top() -> usize {
  let sp: usize;
  unsafe { core::arch::asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags)) };
  sp
}

#[cfg(target_arch = "x86")]
#[inline(never)]
pub fn current_stack_top() -> usize {
  let sp: usize;
  unsafe { core::arch::asm!("mov {}, esp", out(reg) sp, options(nomem, nostack, preserves_flags)) };
  sp
}

#[cfg(target_arch = "aarch64")]
#[inline(never)]
pub fn current_stack_top() -> usize {
  let sp: usize;
  unsafe { core::arch::asm!("mov {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags)) };
  sp
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
#[inline(never)]
pub fn current_stack_top() -> usize {
  let marker = 0usize;
  core::hint::black_box(&marker) as *const usize as usize
}

/// Roots of the running process: its static data and the calling thread's stack.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[derive(Debug, Clone)]
pub struct ProcessRoots {
  statics: Range<usize>,
  stack_base: usize,
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
impl ProcessRoots {
  /// Captures the roots for the calling thread.
  ///
  /// The result must only be used to collect from that same thread.
  pub fn capture() -> Result<Self, HeapError> {
    Ok(Self {
      statics: static_data_bounds(),
      stack_base: linux::thread_stack_base()?,
    })
  }

  /// Takes the stack base from the `startstack` field of `/proc/self/stat`.
  ///
  /// That field describes the main thread's stack only, so collections must
  /// run on the main thread.
  pub fn from_proc_stat() -> Result<Self, HeapError> {
    let stat = std::fs::read_to_string("/proc/self/stat")
      .map_err(|err| HeapError::RootDiscovery(format!("/proc/self/stat: {err}")))?;
    let stack_base = linux::parse_start_stack(&stat)
      .ok_or_else(|| HeapError::RootDiscovery("malformed /proc/self/stat".to_owned()))?;

    Ok(Self {
      statics: static_data_bounds(),
      stack_base,
    })
  }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
unsafe impl RootSource for ProcessRoots {
  fn static_data_bounds(&self) -> Range<usize> {
    self.statics.clone()
  }

  fn stack_base(&self) -> usize {
    self.stack_base
  }

  fn current_stack_top(&self) -> usize {
    current_stack_top()
  }
}

/// `.data` through `.bss`, as laid out by the linker.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn static_data_bounds() -> Range<usize> {
  unsafe extern "C" {
    safe static __data_start: u8;
    safe static _end: u8;
  }
  let start = (&raw const __data_start) as usize;
  let end = (&raw const _end) as usize;
  start..end
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
mod linux {
  use core::{mem, ptr};

  use libc::c_void;

  use crate::HeapError;

  /// Highest address of the calling thread's stack.
  pub fn thread_stack_base() -> Result<usize, HeapError> {
    unsafe {
      let mut attr: libc::pthread_attr_t = mem::zeroed();
      if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
        return Err(HeapError::RootDiscovery("pthread_getattr_np failed".to_owned()));
      }

      let mut addr: *mut c_void = ptr::null_mut();
      let mut size: usize = 0;
      let rc = libc::pthread_attr_getstack(&attr, &mut addr, &mut size);
      libc::pthread_attr_destroy(&mut attr);

      if rc != 0 {
        return Err(HeapError::RootDiscovery("pthread_attr_getstack failed".to_owned()));
      }
      Ok(addr as usize + size)
    }
  }

  /// Field 28 of `/proc/<pid>/stat`. The command name (field 2) may itself
  /// contain spaces and parentheses, so counting starts after the last `)`.
  pub fn parse_start_stack(stat: &str) -> Option<usize> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(25)?.parse().ok()
  }
}

#[cfg(all(test, target_os = "linux", target_env = "gnu"))]
mod tests {
  use core::hint::black_box;

  use super::*;
  use crate::{WORD, testing};

  #[test]
  fn test_parse_start_stack() {
    let mut fields: Vec<String> = (3..=52).map(|n| n.to_string()).collect();
    fields[0] = "S".to_owned();
    fields[25] = "140737488346112".to_owned();
    let stat = format!("4242 (odd ) name) {}\n", fields.join(" "));

    assert_eq!(linux::parse_start_stack(&stat), Some(140_737_488_346_112));
    assert_eq!(linux::parse_start_stack("4242 (short) S 1 2"), None);
    assert_eq!(linux::parse_start_stack("no parens"), None);
  }

  #[test]
  fn test_capture_bounds_are_sane() {
    let roots = ProcessRoots::capture().unwrap();

    let statics = roots.static_data_bounds();
    assert!(statics.start < statics.end);
    let stack = roots.stack_extent();
    assert!(!stack.is_empty());

    let local = 0usize;
    let local = black_box(&local) as *const usize as usize;
    assert!(stack.contains(&local));
  }

  #[test]
  fn test_from_proc_stat() {
    let roots = ProcessRoots::from_proc_stat().unwrap();
    assert!(roots.stack_base() > 0);
  }

  #[test]
  fn test_stack_slot_keeps_block_alive() {
    let mut heap = testing::heap(64 * WORD);
    let roots = ProcessRoots::capture().unwrap();

    let kept = heap.allocate(4 * WORD).unwrap();
    let slot = black_box([kept.as_ptr() as usize]);

    heap.collect(&roots);

    assert!(heap.is_live(kept));
    black_box(&slot);
  }
}
