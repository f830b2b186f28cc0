//! Remote API access
//!
//! GraphQL client, wire models, and the client-side rate limiter that paces
//! every catalog query.

mod api_client;
mod models;
mod rate_limiter;

pub use api_client::{ApiClient, ApiClientConfig, ChunkProgressFn, RemoteApi, RetryPolicy};
pub use models::*;
pub use rate_limiter::{priorities, RateLimiter, RateLimiterConfig, RateLimiterStatus};
