//! Login throttling per client address.

pub mod client_address;
pub mod limiter;

pub use client_address::ClientAddressResolver;
pub use limiter::{RateLimitDecision, RateLimiter};
