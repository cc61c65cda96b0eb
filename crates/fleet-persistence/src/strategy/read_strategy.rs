//! Read strategy using enum dispatch.

use std::future::Future;

use crate::error::Result;

/// Determines the cache/store access pattern for reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Check cache first, fall back to the store on miss
    #[default]
    CacheFirst,
    /// Only read from the store
    StoreOnly,
}

impl ReadStrategy {
    /// Execute a read according to the strategy.
    ///
    /// Cache failures are logged and treated as a miss. Population failures
    /// are logged and ignored. Store failures propagate.
    pub async fn read<T, CacheFut, StoreFut, PopulateFut>(
        self,
        cache_fn: impl FnOnce() -> CacheFut,
        store_fn: impl FnOnce() -> StoreFut,
        populate_fn: impl FnOnce(T) -> PopulateFut,
    ) -> Result<Option<T>>
    where
        T: Clone,
        CacheFut: Future<Output = Result<Option<T>>>,
        StoreFut: Future<Output = Result<Option<T>>>,
        PopulateFut: Future<Output = Result<()>>,
    {
        match self {
            Self::CacheFirst => {
                match cache_fn().await {
                    Ok(Some(value)) => {
                        tracing::trace!("Cache hit");
                        return Ok(Some(value));
                    }
                    Ok(None) => tracing::trace!("Cache miss"),
                    Err(e) => tracing::warn!(error = %e, "Cache error, falling back to store"),
                }

                let result = store_fn().await?;
                if let Some(value) = &result {
                    if let Err(e) = populate_fn(value.clone()).await {
                        tracing::warn!(error = %e, "Failed to populate cache");
                    }
                }
                Ok(result)
            }
            Self::StoreOnly => store_fn().await,
        }
    }
}
