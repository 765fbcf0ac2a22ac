//! Egress byte-rate limiting.
//!
//! One limiter is shared by every transfer in the process. Each body chunk
//! reserves its size from a token bucket and sleeps off any deficit before it
//! is released to the client.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::RateLimitConfig;
use crate::error::Result;
use crate::net::{ByteStream, HttpRange, RangeReader};

/// Paces a byte stream.
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Wait until `bytes` may be sent. Dropping the future abandons the wait.
    async fn consume(&self, bytes: usize);
}

/// Throttle that never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl Throttle for Unlimited {
    async fn consume(&self, _bytes: usize) {}
}

/// A token bucket measured in bytes.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Take `amount` tokens, possibly going into debt, and return how long
    /// the caller must wait for the debt to be repaid.
    fn reserve(&mut self, capacity: f64, refill_rate: f64, amount: f64) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
        self.tokens -= amount;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / refill_rate)
        }
    }
}

/// Process-wide byte-rate limiter.
#[derive(Debug)]
pub struct ByteRateLimiter {
    bucket: Mutex<TokenBucket>,
    bytes_per_second: f64,
    burst: f64,
}

impl ByteRateLimiter {
    pub fn new(bytes_per_second: u64, burst_bytes: u64) -> Self {
        let burst = burst_bytes.max(1) as f64;
        Self {
            bucket: Mutex::new(TokenBucket::new(burst)),
            bytes_per_second: bytes_per_second.max(1) as f64,
            burst,
        }
    }

    fn reserve(&self, amount: usize) -> Duration {
        let mut bucket = self.bucket.lock().expect("rate limiter mutex poisoned");
        bucket.reserve(self.burst, self.bytes_per_second, amount as f64)
    }
}

#[async_trait]
impl Throttle for ByteRateLimiter {
    async fn consume(&self, bytes: usize) {
        // Reservations never exceed the burst so one huge chunk cannot stall
        // every other transfer for its whole duration.
        let slice = self.burst as usize;
        let mut remaining = bytes;
        while remaining > 0 {
            let take = remaining.min(slice);
            let wait = self.reserve(take);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            remaining -= take;
        }
    }
}

/// Build the shared throttle described by `config`.
pub fn from_config(config: &RateLimitConfig) -> Arc<dyn Throttle> {
    if config.enabled {
        tracing::info!(
            bytes_per_second = config.bytes_per_second,
            burst_bytes = config.burst_bytes,
            "Egress rate limit enabled"
        );
        Arc::new(ByteRateLimiter::new(config.bytes_per_second, config.burst_bytes))
    } else {
        Arc::new(Unlimited)
    }
}

/// Pace every chunk of `stream` through `throttle`.
pub fn throttle_stream(stream: ByteStream, throttle: Arc<dyn Throttle>) -> ByteStream {
    stream
        .then(move |chunk| {
            let throttle = throttle.clone();
            async move {
                if let Ok(bytes) = &chunk {
                    throttle.consume(bytes.len()).await;
                }
                chunk
            }
        })
        .boxed()
}

/// Range reader whose every stream is paced by a throttle.
pub struct RateLimitedRangeReader {
    inner: Arc<dyn RangeReader>,
    throttle: Arc<dyn Throttle>,
}

impl RateLimitedRangeReader {
    pub fn new(inner: Arc<dyn RangeReader>, throttle: Arc<dyn Throttle>) -> Self {
        Self { inner, throttle }
    }
}

#[async_trait]
impl RangeReader for RateLimitedRangeReader {
    async fn range_read(&self, range: HttpRange) -> Result<ByteStream> {
        let stream = self.inner.range_read(range).await?;
        Ok(throttle_stream(stream, self.throttle.clone()))
    }
}
