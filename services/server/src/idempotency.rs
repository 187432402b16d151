//! Idempotency cache.
//!
//! Keyed by the caller's `Idempotency-Key` header. For any key, at most one
//! request runs to completion: the first caller becomes the owner and must
//! either store the serialized 2xx response or release the key on failure;
//! concurrent callers observe the in-flight marker (409) or the cached
//! response verbatim. Entries expire 24 hours of *virtual* time after
//! completion — expired entries are dropped lazily on read and swept by a
//! background task once per virtual hour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tiger_clock::VirtualClock;
use tokio::sync::RwLock;

pub const IDEMPOTENCY_TTL_SECS: i64 = 24 * 3600;
const SWEEP_INTERVAL_SECS: i64 = 3600;

/// A captured 2xx response, replayed verbatim on cache hits.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
enum Entry {
    InFlight,
    Complete {
        response: CachedResponse,
        expires_at: i64,
    },
}

/// Outcome of claiming a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Caller is the new request and owns the key; it must call
    /// [`IdempotencyCache::complete`] or [`IdempotencyCache::release`].
    Owner,
    /// Another request with this key is still running.
    InFlight,
    /// A previous request completed; replay the captured response.
    Complete(CachedResponse),
}

pub struct IdempotencyCache {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<VirtualClock>,
}

impl IdempotencyCache {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn claim(&self, key: &str) -> Claim {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            None => {
                entries.insert(key.to_string(), Entry::InFlight);
                Claim::Owner
            }
            Some(Entry::InFlight) => Claim::InFlight,
            Some(Entry::Complete { expires_at, .. }) if *expires_at <= now => {
                // Lazy expiry: the key is fresh again and this caller owns it.
                entries.insert(key.to_string(), Entry::InFlight);
                Claim::Owner
            }
            Some(Entry::Complete { response, .. }) => Claim::Complete(response.clone()),
        }
    }

    /// Store the owner's successful response; cacheable until the TTL.
    pub async fn complete(&self, key: &str, response: CachedResponse) {
        let expires_at = self.clock.now() + IDEMPOTENCY_TTL_SECS;
        self.entries.write().await.insert(
            key.to_string(),
            Entry::Complete {
                response,
                expires_at,
            },
        );
    }

    /// Clear an in-flight marker after a failed owning request so a retry
    /// can run.
    pub async fn release(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if matches!(entries.get(key), Some(Entry::InFlight)) {
            entries.remove(key);
        }
    }

    /// Drop expired complete entries.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| match entry {
            Entry::InFlight => true,
            Entry::Complete { expires_at, .. } => *expires_at > now,
        });
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Sweep once per virtual hour, checked on a one-second wall tick. In real
/// mode that is an hourly sweep; in accelerated and manual modes the virtual
/// clock drives the cadence.
pub fn spawn_sweeper(cache: Arc<IdempotencyCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sweep = cache.clock.now();
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let now = cache.clock.now();
            if now - last_sweep >= SWEEP_INTERVAL_SECS {
                let dropped = cache.sweep().await;
                if dropped > 0 {
                    tracing::debug!(dropped, "idempotency sweep");
                }
                last_sweep = now;
            }
        }
    })
}
