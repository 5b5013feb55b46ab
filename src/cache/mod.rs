//! Resolver answer caches.

pub mod memory;
pub mod persist;

pub use memory::{DEFAULT_MAX_ENTRIES, DEFAULT_MAX_TTL, MemoryCache, ResolverCache};
pub use persist::{PersistentCache, default_persist_path};
