//! CPU client: parallelism settings for batch-norm dispatch

use crate::error::Result;
#[cfg(feature = "rayon")]
use crate::error::Error;
#[cfg(feature = "rayon")]
use std::sync::Arc;

/// Default minimum number of items a rayon task processes
pub const DEFAULT_RAYON_MIN_LEN: usize = 4;

/// How data-parallel phases use threads
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParallelismConfig {
    /// Threads for data-parallel phases; `None` uses rayon's global pool
    pub max_threads: Option<usize>,
    /// Minimum items per rayon task (`with_min_len`)
    pub min_len: usize,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            min_len: DEFAULT_RAYON_MIN_LEN,
        }
    }
}

/// CPU client for operation dispatch
///
/// Split-kept workers and the normalize pass run on rayon (when the `rayon` feature is
/// enabled) inside [`CpuClient::install_parallelism`]. Split-reduce workers are scoped
/// threads, one per plan worker, because they meet at a barrier.
#[derive(Clone, Debug, Default)]
pub struct CpuClient {
    parallelism: ParallelismConfig,
    #[cfg(feature = "rayon")]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl CpuClient {
    /// Client using rayon's global pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Client with explicit parallelism settings
    pub fn with_parallelism(parallelism: ParallelismConfig) -> Result<Self> {
        #[cfg(feature = "rayon")]
        {
            let pool = match parallelism.max_threads {
                Some(n) => Some(Arc::new(
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(n)
                        .build()
                        .map_err(|e| Error::Internal(format!("failed to build thread pool: {e}")))?,
                )),
                None => None,
            };
            Ok(Self { parallelism, pool })
        }
        #[cfg(not(feature = "rayon"))]
        {
            Ok(Self { parallelism })
        }
    }

    /// Parallelism settings
    #[inline]
    pub fn parallelism(&self) -> &ParallelismConfig {
        &self.parallelism
    }

    /// Minimum items per rayon task
    #[inline]
    pub fn rayon_min_len(&self) -> usize {
        self.parallelism.min_len.max(1)
    }

    /// Run `f` inside this client's thread pool
    #[cfg(feature = "rayon")]
    pub fn install_parallelism<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_len_floor() {
        let client = CpuClient::with_parallelism(ParallelismConfig {
            max_threads: Some(2),
            min_len: 0,
        })
        .unwrap();
        assert_eq!(client.rayon_min_len(), 1);
        assert_eq!(CpuClient::new().rayon_min_len(), DEFAULT_RAYON_MIN_LEN);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_install_uses_pool() {
        let client = CpuClient::with_parallelism(ParallelismConfig {
            max_threads: Some(3),
            min_len: 1,
        })
        .unwrap();
        assert_eq!(client.install_parallelism(rayon::current_num_threads), 3);
    }
}
