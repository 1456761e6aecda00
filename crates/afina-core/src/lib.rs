//! Core building blocks for a memcached-style key/value server: an elastic
//! thread-pool task executor and a bounded-memory LRU cache.
//!
//! Neither type performs any network I/O or protocol parsing — both are
//! plain in-process primitives meant to be driven by a server loop that
//! lives outside this crate.

pub mod cache;
pub mod executor;

pub use cache::LruCache;
pub use executor::{Executor, ExecutorState, Task};
