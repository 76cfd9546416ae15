pub mod api_key;
pub mod middleware;
pub mod rate_limiter;

pub use middleware::Caller;
pub use rate_limiter::RateLimiter;
