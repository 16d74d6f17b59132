//! Attempt counters and block windows keyed on email / email:ip identities.
//!
//! All state lives behind the [`Kv`] trait, whose contract is the atomic
//! INCR / SET-with-TTL / EXISTS / DEL quartet. Counters and flags expire on
//! their own, so a stale identity never stays blocked past its window.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SecurityConfig;

/// Atomic key-value primitives backing the limiter. Any error from an
/// implementation is treated by callers as a rejection (fail closed).
#[async_trait]
pub trait Kv: Send + Sync {
    /// Atomically increment a counter, creating it with the given TTL on
    /// first increment. Returns the new count.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Set an existence flag with a TTL.
    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<()>;
}

struct Entry {
    count: u64,
    deadline: Instant,
}

impl Entry {
    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// In-process [`Kv`] on a `DashMap`. Per-key operations go through the
/// map's entry lock, so increments are atomic without a read-modify-write
/// race. Expired entries are treated as absent and removed lazily.
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            deadline: Instant::now() + ttl,
        });

        if entry.expired() {
            entry.count = 0;
            entry.deadline = Instant::now() + ttl;
        }

        entry.count += 1;
        Ok(entry.count)
    }

    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                count: 1,
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        // The read guard must be gone before remove, or the shard locks up.
        let live = match self.entries.get(key) {
            Some(entry) => !entry.expired(),
            None => return Ok(false),
        };

        if !live {
            self.entries.remove(key);
        }
        Ok(live)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Per-endpoint failure accounting. Key layout:
/// `login:fail:{email}:{ip}`, `admin:fail:{email}`,
/// `reset:attempts:{email}:{ip}`, `reset:cooldown:{email}`, each with a
/// matching `*:block:*` flag.
#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn Kv>,
    config: SecurityConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(kv: Arc<dyn Kv>, config: SecurityConfig) -> Self {
        Self { kv, config }
    }

    pub async fn is_login_blocked(&self, email: &str, ip: &str) -> Result<bool> {
        self.kv.exists(&format!("login:block:{email}:{ip}")).await
    }

    /// Record a failed login. Returns true if the identity is now blocked.
    pub async fn record_login_failure(&self, email: &str, ip: &str) -> Result<bool> {
        let ttl = Duration::from_secs(self.config.login_block_seconds);
        let count = self.kv.incr(&format!("login:fail:{email}:{ip}"), ttl).await?;

        if count >= self.config.login_max_attempts {
            self.kv
                .set_flag(&format!("login:block:{email}:{ip}"), ttl)
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    pub async fn clear_login_failures(&self, email: &str, ip: &str) -> Result<()> {
        self.kv.del(&format!("login:fail:{email}:{ip}")).await?;
        self.kv.del(&format!("login:block:{email}:{ip}")).await
    }

    pub async fn is_admin_blocked(&self, email: &str) -> Result<bool> {
        self.kv.exists(&format!("admin:block:{email}")).await
    }

    pub async fn record_admin_failure(&self, email: &str) -> Result<bool> {
        let ttl = Duration::from_secs(self.config.admin_block_seconds);
        let count = self.kv.incr(&format!("admin:fail:{email}"), ttl).await?;

        if count >= self.config.admin_max_attempts {
            self.kv
                .set_flag(&format!("admin:block:{email}"), ttl)
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    pub async fn clear_admin_failures(&self, email: &str) -> Result<()> {
        self.kv.del(&format!("admin:fail:{email}")).await?;
        self.kv.del(&format!("admin:block:{email}")).await
    }

    pub async fn is_reset_blocked(&self, email: &str, ip: &str) -> Result<bool> {
        self.kv.exists(&format!("reset:block:{email}:{ip}")).await
    }

    /// Every reset request counts toward the attempt budget, whether or not
    /// the account exists, to deter enumeration probing.
    pub async fn record_reset_attempt(&self, email: &str, ip: &str) -> Result<bool> {
        let ttl = Duration::from_secs(self.config.reset_block_seconds);
        let count = self
            .kv
            .incr(&format!("reset:attempts:{email}:{ip}"), ttl)
            .await?;

        if count >= self.config.reset_max_attempts {
            self.kv
                .set_flag(&format!("reset:block:{email}:{ip}"), ttl)
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// The cooldown throttles repeated reset mails for one account even
    /// under the attempt threshold.
    pub async fn in_reset_cooldown(&self, email: &str) -> Result<bool> {
        self.kv.exists(&format!("reset:cooldown:{email}")).await
    }

    pub async fn start_reset_cooldown(&self, email: &str) -> Result<()> {
        self.kv
            .set_flag(
                &format!("reset:cooldown:{email}"),
                Duration::from_secs(self.config.reset_cooldown_seconds),
            )
            .await
    }
}
