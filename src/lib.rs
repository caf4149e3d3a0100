//! # open-cache
//!
//! A local bounded cache, a remote key-value cache and distributed locks
//! behind one async facade.
//!
//! ## Features
//!
//! - **Local Bounded Cache:** size- and time-bounded, single-flight compute-if-absent (moka)
//! - **Remote Cache:** values, hash fields, counters, TTLs and idempotency tokens
//! - **Distributed Locks:** scoped `with_lock` / `with_try_lock` with guaranteed release
//! - **Backends:** Redis (`redis` feature) or an in-memory store (`inmemory` feature, default)
//! - **Injectable:** every handle is passed in, so tests can swap the store and the locks
//!
//! ## Quick Start
//!
//! ```ignore
//! use open_cache::{CacheServiceBuilder, Error};
//! use std::time::Duration;
//!
//! let service = CacheServiceBuilder::<String>::new().build_in_memory()?;
//!
//! // Local compute-if-absent
//! let greeting = service
//!     .local()
//!     .get_or_compute("greeting", |_| async { Ok::<_, Error>("hello".to_string()) })
//!     .await?;
//!
//! // Remote counter, TTL restarted on every increment
//! let hits = service.remote().increment_one("hits", Duration::from_secs(60)).await?;
//!
//! // Critical section
//! service.locks().with_lock("report", || async { rebuild_report().await }).await?;
//! ```

#[macro_use]
extern crate log;

pub mod builder;
pub mod config;
pub mod error;
pub mod fields;
pub mod local;
pub mod lock;
pub mod remote;
pub mod service;
pub mod store;
pub mod tier;

// Re-exports for convenience
pub use builder::CacheServiceBuilder;
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use fields::FieldMap;
pub use local::LocalCache;
pub use lock::{DistributedLock, LockCoordinator, LockProvider};
pub use remote::RemoteCache;
pub use service::CacheService;
pub use store::RemoteStore;
pub use tier::CacheTier;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
