//! Sea-ORM entities for cartwise-store

pub mod cache_entries;

pub use cache_entries::Entity as CacheEntries;
