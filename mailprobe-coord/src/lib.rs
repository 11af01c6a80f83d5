//! Coordination for mailprobe: adaptive throttling and TTL caching.
//!
//! Both run in-process by default. With a Redis URL configured, the
//! [`Coordinator`] swaps them onto Redis at runtime so that every process
//! sharing the same store and key prefix also shares throttle state and
//! cached results.

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod store;
pub mod switch;
pub mod throttle;

pub use cache::{CacheLayer, CacheStore, LocalCache, RedisCache};
pub use coordinator::Coordinator;
pub use error::{CacheError, StoreError, ThrottleError};
pub use store::RedisStore;
pub use switch::BackendSwitch;
pub use throttle::{
    AcquireDecision, BlockReason, HostThrottleSnapshot, LocalThrottle, RedisThrottle,
    ThrottleController, ThrottlePermit, ThrottleStore,
};
