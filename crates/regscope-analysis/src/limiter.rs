//! Client-side rate limiting for remote capabilities
//!
//! Two token buckets per limiter: one counting calls, one counting the
//! approximate size of each request in characters. A request that would
//! overdraw either bucket waits until both have refilled.

use crate::capability::{EmbedKind, RemoteCapability, RerankHit};
use crate::error::CapabilityError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Per-minute quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub calls_per_minute: u32,
    pub tokens_per_minute: u32,
}

impl RateLimit {
    /// Trial-key quota
    pub const TRIAL: Self = Self {
        calls_per_minute: 10,
        tokens_per_minute: 100_000,
    };

    /// Production-key quota
    pub const PRODUCTION: Self = Self {
        calls_per_minute: 100_000,
        tokens_per_minute: 2_000_000,
    };

    #[must_use]
    pub const fn new(calls_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            calls_per_minute,
            tokens_per_minute,
        }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.calls_per_minute > 0 && self.tokens_per_minute > 0
    }
}

/// Capability operation, for accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Embed,
    Rerank,
    Complete,
}

/// Calls and characters sent per operation
#[derive(Debug, Default)]
pub struct CallStats {
    calls: DashMap<Operation, u64>,
    chars: AtomicU64,
}

impl CallStats {
    pub fn record(&self, operation: Operation, chars: u64) {
        *self.calls.entry(operation).or_insert(0) += 1;
        self.chars.fetch_add(chars, Ordering::Relaxed);
    }

    #[must_use]
    pub fn calls(&self, operation: Operation) -> u64 {
        self.calls.get(&operation).map_or(0, |c| *c)
    }

    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    #[must_use]
    pub fn chars_sent(&self) -> u64 {
        self.chars.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    available: f64,
    per_second: f64,
    updated: Instant,
}

impl Bucket {
    fn per_minute(limit: u32, now: Instant) -> Self {
        let capacity = f64::from(limit.max(1));
        Self {
            capacity,
            available: capacity,
            per_second: capacity / 60.0,
            updated: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.updated).as_secs_f64();
        self.available = (self.available + elapsed * self.per_second).min(self.capacity);
        self.updated = now;
    }

    /// Debit `amount` and return how long the caller must wait for it
    fn reserve(&mut self, amount: f64, now: Instant) -> Duration {
        self.refill(now);
        self.available -= amount.min(self.capacity);
        if self.available >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.available / self.per_second)
        }
    }
}

#[derive(Debug)]
struct Buckets {
    calls: Bucket,
    tokens: Bucket,
}

/// Decorator that throttles and counts calls to an inner capability
pub struct RateLimitedCapability {
    inner: Arc<dyn RemoteCapability>,
    limit: RateLimit,
    buckets: Mutex<Buckets>,
    stats: Arc<CallStats>,
}

impl fmt::Debug for RateLimitedCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedCapability")
            .field("limit", &self.limit)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl RateLimitedCapability {
    #[must_use]
    pub fn new(inner: Arc<dyn RemoteCapability>, limit: RateLimit) -> Self {
        let now = Instant::now();
        Self {
            inner,
            limit,
            buckets: Mutex::new(Buckets {
                calls: Bucket::per_minute(limit.calls_per_minute, now),
                tokens: Bucket::per_minute(limit.tokens_per_minute, now),
            }),
            stats: Arc::new(CallStats::default()),
        }
    }

    #[inline]
    #[must_use]
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Shared counters, live while the limiter is in use
    #[must_use]
    pub fn stats(&self) -> Arc<CallStats> {
        Arc::clone(&self.stats)
    }

    async fn acquire(&self, operation: Operation, chars: usize) {
        let chars = chars as u64;
        let wait = {
            let now = Instant::now();
            let mut buckets = self.buckets.lock();
            #[allow(clippy::cast_precision_loss)]
            let token_wait = buckets.tokens.reserve(chars as f64, now);
            buckets.calls.reserve(1.0, now).max(token_wait)
        };
        if !wait.is_zero() {
            tracing::debug!(?operation, wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
        self.stats.record(operation, chars);
    }
}

#[async_trait]
impl RemoteCapability for RateLimitedCapability {
    async fn embed(
        &self,
        model: &str,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, CapabilityError> {
        self.acquire(Operation::Embed, texts.iter().map(String::len).sum())
            .await;
        self.inner.embed(model, texts, kind).await
    }

    async fn rerank(
        &self,
        model: &str,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, CapabilityError> {
        let chars = query.len() + documents.iter().map(String::len).sum::<usize>();
        self.acquire(Operation::Rerank, chars).await;
        self.inner.rerank(model, query, documents, top_n).await
    }

    async fn complete(
        &self,
        model: &str,
        preamble: &str,
        prompt: &str,
    ) -> Result<String, CapabilityError> {
        self.acquire(Operation::Complete, preamble.len() + prompt.len())
            .await;
        self.inner.complete(model, preamble, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl RemoteCapability for Echo {
        async fn embed(
            &self,
            _model: &str,
            texts: &[String],
            _kind: EmbedKind,
        ) -> Result<Vec<Vec<f32>>, CapabilityError> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }

        async fn rerank(
            &self,
            _model: &str,
            _query: &str,
            _documents: &[String],
            _top_n: usize,
        ) -> Result<Vec<RerankHit>, CapabilityError> {
            Ok(vec![])
        }

        async fn complete(
            &self,
            _model: &str,
            _preamble: &str,
            prompt: &str,
        ) -> Result<String, CapabilityError> {
            Ok(prompt.to_string())
        }
    }

    #[test]
    fn presets() {
        assert_eq!(RateLimit::TRIAL.calls_per_minute, 10);
        assert_eq!(RateLimit::TRIAL.tokens_per_minute, 100_000);
        assert_eq!(RateLimit::PRODUCTION.calls_per_minute, 100_000);
        assert_eq!(RateLimit::PRODUCTION.tokens_per_minute, 2_000_000);
        assert!(!RateLimit::new(0, 10).is_valid());
    }

    #[test]
    fn bucket_waits_for_refill() {
        let start = Instant::now();
        let mut bucket = Bucket::per_minute(60, start);
        for _ in 0..60 {
            assert_eq!(bucket.reserve(1.0, start), Duration::ZERO);
        }
        let wait = bucket.reserve(1.0, start);
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-6);
        let later = start + Duration::from_secs(2);
        assert_eq!(bucket.reserve(1.0, later), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_beyond_quota_are_delayed() {
        let limited = RateLimitedCapability::new(Arc::new(Echo), RateLimit::new(2, 1_000_000));
        let start = Instant::now();
        for _ in 0..3 {
            limited.complete("m", "", "hello").await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(29));
        let stats = limited.stats();
        assert_eq!(stats.calls(Operation::Complete), 3);
        assert_eq!(stats.chars_sent(), 15);
    }

    #[tokio::test]
    async fn stats_count_per_operation() {
        let limited = RateLimitedCapability::new(Arc::new(Echo), RateLimit::PRODUCTION);
        limited
            .embed("m", &["a".to_string(), "bb".to_string()], EmbedKind::Document)
            .await
            .unwrap();
        limited.rerank("m", "q", &[], 5).await.unwrap();
        let stats = limited.stats();
        assert_eq!(stats.calls(Operation::Embed), 1);
        assert_eq!(stats.calls(Operation::Rerank), 1);
        assert_eq!(stats.calls(Operation::Complete), 0);
        assert_eq!(stats.total_calls(), 2);
        assert_eq!(stats.chars_sent(), 4);
    }
}
