//! Response caching for the domain services.
//!
//! This module provides the in-memory cache every service reads through:
//! - Entries are JSON responses stamped with their write time
//! - Freshness is decided by the reader, against the layer's TTL
//! - Invalidation clears everything or every key containing a pattern
//! - Identical concurrent reads share one network request

mod key;
mod layer;
mod storage;
mod traits;

pub use key::{canonical_params, keyed};
pub use layer::CacheLayer;
pub use storage::{CacheEntry, CacheError, CacheStats, CacheStorage, MemoryStorage, NoopStorage};
pub use traits::{CacheResult, CacheSource, QueryKey};
