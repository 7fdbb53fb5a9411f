//! Test infrastructure for the cloud network reconciler.
//!
//! Provides:
//! - An in-memory cloud region with provider-style ids, filters and
//!   dependency errors
//! - A fake cloud API client that records every call and can fail on demand
//! - An in-memory cluster scope
//! - Fixtures for logging, backoff and subnet specs

mod cloud;
mod fake_ec2;
pub mod fixtures;
mod scope;

pub use cloud::{CloudState, PROVIDER_IPV6_CIDR};
pub use fake_ec2::{Call, FakeEc2, Operation};
pub use fixtures::*;
pub use scope::MemoryScope;
