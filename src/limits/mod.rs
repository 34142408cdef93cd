//! Provider protection — circuit breaker and rate limiter.
//!
//! Both are consulted before any provider call and may reject
//! independently. The breaker reacts to failures; the limiter enforces
//! volume ceilings. Neither depends on any provider capability.

pub mod breaker;
pub mod limiter;

pub use breaker::{BreakerConfig, BreakerRegistry, CircuitKey, CircuitState, ProviderCircuit};
pub use limiter::{RateLimitSettings, RateLimiter};
