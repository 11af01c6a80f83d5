//! Mailbox verification across a domain's mail exchangers.
//!
//! [`Verifier`] resolves the domain, orders its exchangers, optionally checks
//! for catch-all behaviour, then probes each exchanger in turn through the
//! shared throttle until one answers definitively.

pub mod catch_all;
pub mod error;
pub mod ordering;
pub mod orchestrator;
pub mod resolver;

pub use catch_all::CatchAllStatus;
pub use error::ResolveError;
pub use orchestrator::Verifier;
pub use ordering::order_exchangers;
pub use resolver::{CachedResolver, DnsResolver, MxResolver};
