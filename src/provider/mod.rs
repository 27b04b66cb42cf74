pub mod circuit_breaker;
pub mod client;
pub mod latency;
pub mod payload;
pub mod rate_limiter;

pub use circuit_breaker::CircuitBreaker;
pub use client::ProviderClient;
pub use rate_limiter::RateLimiter;
