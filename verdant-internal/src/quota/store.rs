use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

use crate::error::Error;

/// A stored value together with its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub payload: String,
}

/// Pluggable persistence port for quota state.
///
/// The engine performs all mutation through `compare_and_swap`, so a backend
/// only has to provide atomic per-key versioned writes; it never needs to
/// understand the payloads (JSON-serialized records). Production deployments
/// back this with a durable, TTL-capable store so quota state survives
/// restarts; tests use the in-memory adapter.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, Error>;

    /// Write `payload` at `key` if the current version matches `expected`
    /// (`None` = create only if absent). Returns whether the swap applied.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        payload: String,
        ttl: Duration,
    ) -> Result<bool, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
struct StoredEntry {
    version: u64,
    payload: String,
    expires_at: u64,
}

/// In-memory store adapter. Entries expire lazily on read and are reaped by
/// the background sweeper so fingerprints that go quiet don't accumulate
/// forever.
#[derive(Debug, Default)]
pub struct InMemoryQuotaStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start the background sweep that drops expired entries.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut sweep_interval = interval(every);
            sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                sweep_interval.tick().await;
                let now = epoch_ms();
                let before = store.entries.len();
                store.entries.retain(|_, entry| entry.expires_at > now);
                let swept = before.saturating_sub(store.entries.len());
                if swept > 0 {
                    debug!("Swept {swept} expired quota entries");
                }
            }
        })
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, Error> {
        let now = epoch_ms();
        Ok(self.entries.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(Versioned {
                    version: entry.version,
                    payload: entry.payload.clone(),
                })
            } else {
                None
            }
        }))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        payload: String,
        ttl: Duration,
    ) -> Result<bool, Error> {
        let now = epoch_ms();
        let expires_at = now + ttl.as_millis() as u64;

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = occupied.get().expires_at > now;
                let current = live.then(|| occupied.get().version);
                if current == expected {
                    occupied.insert(StoredEntry {
                        version: expected.unwrap_or(0) + 1,
                        payload,
                        expires_at,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(StoredEntry {
                        version: 1,
                        payload,
                        expires_at,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }
}
