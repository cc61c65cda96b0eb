//! Write strategy using enum dispatch.

use std::future::Future;

use crate::error::Result;

/// Determines the cache/store write pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Write the store, then invalidate the cache entry
    #[default]
    WriteAround,
    /// Write the store only
    StoreOnly,
}

/// Cache state after a successful store write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSync {
    /// The cache entry was dropped and cannot shadow the new value
    Invalidated,
    /// The cache may still hold the previous value
    Stale,
}

impl WriteStrategy {
    /// Execute a write according to the strategy.
    ///
    /// The store write must succeed before the cache is touched. Only a
    /// successful invalidation reports [`CacheSync::Invalidated`]; the caller
    /// must not trust the cache for this entry on [`CacheSync::Stale`].
    pub async fn write<StoreFut, InvalidateFut>(
        self,
        store_fn: impl FnOnce() -> StoreFut,
        invalidate_fn: impl FnOnce() -> InvalidateFut,
    ) -> Result<CacheSync>
    where
        StoreFut: Future<Output = Result<()>>,
        InvalidateFut: Future<Output = Result<()>>,
    {
        store_fn().await?;

        match self {
            Self::WriteAround => match invalidate_fn().await {
                Ok(()) => Ok(CacheSync::Invalidated),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to invalidate cache");
                    Ok(CacheSync::Stale)
                }
            },
            Self::StoreOnly => Ok(CacheSync::Stale),
        }
    }
}
