pub mod block_cache;

pub use block_cache::{BlockCache, BlockCacheOptions, CacheRead, FetchSpec};
