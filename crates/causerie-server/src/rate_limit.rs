//! Token-bucket rate limiting per client.
//!
//! Requests carrying an actor header are limited per actor, anonymous ones
//! per client IP.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use causerie_shared::constants::ACTOR_HEADER;
use causerie_shared::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    Actor(UserId),
    Ip(IpAddr),
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<ClientKey, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub async fn check(&self, key: ClientKey) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    /// Drop buckets idle for longer than `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: f64) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
        before - buckets.len()
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(key) = client_key(&req) {
        if !limiter.check(key).await {
            warn!(client = ?key, "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Actor header first, then ConnectInfo, X-Forwarded-For and X-Real-IP.
fn client_key<B>(req: &Request<B>) -> Option<ClientKey> {
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    if let Some(actor) = header(ACTOR_HEADER).and_then(|v| v.trim().parse::<UserId>().ok()) {
        return Some(ClientKey::Actor(actor));
    }

    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(ClientKey::Ip(connect_info.0.ip()));
    }

    if let Some(ip) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
    {
        return Some(ClientKey::Ip(ip));
    }

    header("x-real-ip")
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .map(ClientKey::Ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_burst_then_limits() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let key = ClientKey::Ip("127.0.0.1".parse().unwrap());

        for _ in 0..5 {
            assert!(limiter.check(key).await);
        }
        assert!(!limiter.check(key).await);
    }

    #[tokio::test]
    async fn clients_have_separate_buckets() {
        let limiter = RateLimiter::new(10.0, 2.0);
        let alice = ClientKey::Actor(UserId::new());
        let bob = ClientKey::Actor(UserId::new());

        assert!(limiter.check(alice).await);
        assert!(limiter.check(alice).await);
        assert!(!limiter.check(alice).await);

        assert!(limiter.check(bob).await);
    }

    #[tokio::test]
    async fn purge_stale_drops_idle_buckets() {
        let limiter = RateLimiter::new(10.0, 5.0);
        assert!(limiter.check(ClientKey::Ip("192.168.1.1".parse().unwrap())).await);

        assert_eq!(limiter.purge_stale(0.0).await, 1);
        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn actor_header_wins_over_forwarded_ip() {
        let actor = UserId::new();
        let req = Request::builder()
            .header(ACTOR_HEADER, actor.to_string())
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(())
            .unwrap();
        assert_eq!(client_key(&req), Some(ClientKey::Actor(actor)));

        let req = Request::builder()
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(())
            .unwrap();
        assert_eq!(
            client_key(&req),
            Some(ClientKey::Ip("10.0.0.1".parse().unwrap()))
        );
    }
}
