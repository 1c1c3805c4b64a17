//! HTTP API
//!
//! REST surface over the request pipeline and the market alert evaluator.
//! Callers identify themselves with `x-user-id` and related headers.

pub mod handlers;
pub mod identity;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use identity::Identity;
pub use server::{router, ApiServer};
pub use types::{ApiResponse, HealthData, ListQuery};
