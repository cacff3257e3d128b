//! Users, their measured throughput and rate limiting.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::config::UserConfig;

/// Id of the default, unauthenticated local identity.
pub const ANONYMOUS_ID: &str = "root";

type ByteLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket holding one second of a user's byte allowance.
struct SpeedLimiter {
    limiter: ByteLimiter,
    burst: NonZeroU32,
}

impl fmt::Debug for SpeedLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeedLimiter").field("burst", &self.burst).finish()
    }
}

impl SpeedLimiter {
    fn new(bytes_per_second: u64) -> Option<Self> {
        let burst = NonZeroU32::new(u32::try_from(bytes_per_second).unwrap_or(u32::MAX))?;
        Some(Self {
            limiter: RateLimiter::direct(Quota::per_second(burst)),
            burst,
        })
    }

    /// Wait until `n` bytes fit the quota, in chunks no larger than the burst.
    async fn acquire(&self, mut n: u64) {
        while n > 0 {
            let chunk = n.min(u64::from(self.burst.get()));
            n -= chunk;
            if let Some(cells) = NonZeroU32::new(chunk as u32) {
                // chunk never exceeds the burst, so capacity is always sufficient
                let _ = self.limiter.until_n_ready(cells).await;
            }
        }
    }
}

/// An identity with measured throughput and rate-limit state.
///
/// Byte counting happens on relay tasks while the speed-check loop samples;
/// all counters are atomics and the sampling window sits behind its own lock.
#[derive(Debug)]
pub struct EagleUser {
    id: String,
    password: String,
    speed_limit: Option<u64>,

    /// Bytes relayed since the last sample.
    bytes: AtomicU64,

    /// Last measured speed in bytes per second.
    speed: AtomicU64,

    /// Whether relayed bytes currently pass through `limiter`.
    limited: AtomicBool,

    limiter: Option<SpeedLimiter>,

    last_check: Mutex<Instant>,
}

/// Snapshot of a user's accounting state.
#[derive(Debug, Clone, Serialize)]
pub struct UserSpeed {
    pub id: String,
    pub speed: u64,
    pub speed_limit: Option<u64>,
    pub limited: bool,
}

impl EagleUser {
    /// Create a new user.
    pub fn new(id: impl Into<String>, password: impl Into<String>, speed_limit: Option<u64>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
            speed_limit,
            bytes: AtomicU64::new(0),
            speed: AtomicU64::new(0),
            limited: AtomicBool::new(false),
            limiter: speed_limit.and_then(SpeedLimiter::new),
            last_check: Mutex::new(Instant::now()),
        }
    }

    pub fn from_config(config: &UserConfig) -> Self {
        Self::new(config.id.clone(), config.password.clone(), config.speed_limit)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this is the default anonymous identity.
    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_ID
    }

    /// Check a presented password.
    pub fn verify(&self, password: &str) -> bool {
        self.password == password
    }

    /// `id:password` token sent in the EagleTunnel authentication line.
    pub fn credentials(&self) -> String {
        format!("{}:{}", self.id, self.password)
    }

    /// Account relayed bytes.
    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Account relayed bytes, waiting for quota while the user is limited.
    pub async fn consume(&self, n: u64) {
        self.add_bytes(n);
        if let Some(limiter) = &self.limiter {
            if self.is_limited() {
                limiter.acquire(n).await;
            }
        }
    }

    /// Last measured speed in bytes per second.
    pub fn speed(&self) -> u64 {
        self.speed.load(Ordering::Relaxed)
    }

    pub fn is_limited(&self) -> bool {
        self.limited.load(Ordering::Relaxed)
    }

    /// Sample the byte counter into the speed measurement.
    pub fn check_speed(&self) {
        let mut last_check = self.last_check.lock();
        let elapsed = last_check.elapsed();
        *last_check = Instant::now();

        let bytes = self.bytes.swap(0, Ordering::Relaxed);
        let millis = elapsed.as_millis().max(1) as u64;
        let speed = bytes.saturating_mul(1000) / millis;
        self.speed.store(speed, Ordering::Relaxed);
    }

    /// Arm or release the byte quota from the last sample.
    ///
    /// A sample over the limit arms it; it stays armed until a sample falls
    /// to half the limit, so a user held at the limit is not released.
    pub fn limit_speed(&self) {
        let Some(limit) = self.speed_limit else {
            return;
        };

        let speed = self.speed();
        if speed > limit {
            self.limited.store(true, Ordering::Relaxed);
        } else if speed <= limit / 2 {
            self.limited.store(false, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> UserSpeed {
        UserSpeed {
            id: self.id.clone(),
            speed: self.speed(),
            speed_limit: self.speed_limit,
            limited: self.is_limited(),
        }
    }
}
