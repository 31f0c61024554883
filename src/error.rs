use thiserror::Error;

/// Everything that can go wrong inside a [`Heap`](crate::Heap).
///
/// `InvalidArgument` and `ResourceExhausted` are ordinary failures handed back
/// to the caller. `IntegrityViolation` never reaches the caller of `release` or
/// `reallocate`: it is routed through [`fatal`] instead.
#[derive(Error, Debug)]
pub enum HeapError {
  #[error("invalid argument: allocation size must be non-zero")]
  InvalidArgument,

  #[error("resource exhausted: memory source refused {requested} bytes")]
  ResourceExhausted { requested: usize },

  #[error("integrity violation at {addr:#x}: {detail}")]
  IntegrityViolation { addr: usize, detail: &'static str },

  #[error("corrupted block header at {addr:#x} (tag {tag:#010x})")]
  Corrupted { addr: usize, tag: u32 },

  #[error("invalid heap configuration: {0}")]
  InvalidConfig(&'static str),

  #[error("root discovery failed: {0}")]
  RootDiscovery(String),
}

impl HeapError {
  pub(crate) fn violation(
    addr: usize,
    detail: &'static str,
  ) -> Self {
    HeapError::IntegrityViolation { addr, detail }
  }
}

/// The single abort path for a heap whose consistency can no longer be trusted.
#[cold]
#[track_caller]
pub(crate) fn fatal(err: HeapError) -> ! {
  log::error!("{err}");
  panic!("{err}");
}
