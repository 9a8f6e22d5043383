//! Offline-first caching for the salon booking PWA.
//!
//! Requests are routed to one of four strategies over three versioned cache
//! partitions; a sweeper keeps each partition within its eviction policy and
//! the install/activate lifecycle moves the cache from one release to the next.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod infra;
pub mod worker;
