//! # Strategy Module
//!
//! Enum-dispatched access strategies for cache-fronted repositories.
//!
//! ### Read Strategies
//! - `CacheFirst` - Check cache, fall back to the store on miss and populate (default)
//! - `StoreOnly` - Skip the cache
//!
//! ### Write Strategies
//! - `WriteAround` - Write the store, then invalidate the cache (default)
//! - `StoreOnly` - Write the store, no cache interaction
//!
//! The cache never receives writes of its own. A write whose invalidation
//! fails reports [`CacheSync::Stale`], and the caller stops trusting the
//! cache for that entry until a later invalidation succeeds.

pub mod read_strategy;
pub mod write_strategy;

pub use read_strategy::ReadStrategy;
pub use write_strategy::{CacheSync, WriteStrategy};
