//! File and chunk metadata: a volatile cache in front of the durable store.

pub mod cache;
pub mod service;
pub mod store;

pub use cache::{CacheResult, LruMetadataCache, MetadataCache};
pub use service::MetadataService;
pub use store::{MetadataResult, MetadataStore, SqliteStore};
