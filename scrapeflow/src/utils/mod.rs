//! Small iterator and hashing utilities shared across the framework.

mod fingerprint;
mod iter;

pub use fingerprint::fingerprint;
pub use iter::{lazy, Concat, LazyIter};
