//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Body chunk leaving a source:
//!     → rate_limit.rs (reserve bytes from the shared bucket, sleep off debt)
//!     → Response body
//! ```
//!
//! # Design Decisions
//! - One limiter for the whole process, injected into the dispatcher
//! - Waits are plain futures so a disconnected client cancels them
//! - Local OS files bypass throttling entirely

pub mod rate_limit;

pub use rate_limit::{throttle_stream, ByteRateLimiter, RateLimitedRangeReader, Throttle, Unlimited};
