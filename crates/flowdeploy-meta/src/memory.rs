use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::types::{MetaStore, WatchEvent, WatchStream};

/// In-process store with revision numbers, prefix watches and TTL expiry.
///
/// Expired keys are removed lazily on the next access, and by
/// [`MemoryMetaStore::purge_expired`], emitting a delete event like a lease
/// expiry would.
#[derive(Debug, Clone)]
pub struct MemoryMetaStore {
    inner: Arc<RwLock<Inner>>,
    tx: broadcast::Sender<WatchEvent>,
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    revision: u64,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    kv: BTreeMap<String, Entry>,
}

impl Inner {
    fn next_revision(&mut self) -> u64 {
        self.revision = self.revision.saturating_add(1);
        self.revision
    }

    fn take_expired(&mut self, now: Instant) -> Vec<WatchEvent> {
        let expired: Vec<String> = self
            .kv
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut events = Vec::with_capacity(expired.len());
        for key in expired {
            self.kv.remove(&key);
            let revision = self.next_revision();
            events.push(WatchEvent {
                key,
                value: None,
                revision,
            });
        }
        events
    }
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            tx,
        }
    }

    fn emit(&self, events: impl IntoIterator<Item = WatchEvent>) {
        for ev in events {
            let _ = self.tx.send(ev);
        }
    }

    /// Drop every key whose TTL has elapsed; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let events = {
            let mut inner = self.inner.write().await;
            inner.take_expired(Instant::now())
        };
        let n = events.len();
        self.emit(events);
        n
    }

    /// Background sweeper so watchers observe expiry without further traffic.
    pub fn spawn_expiry_sweeper(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                store.purge_expired().await;
            }
        })
    }
}

impl Default for MemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MetaStore for MemoryMetaStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<u64> {
        let (rev, mut events) = {
            let mut inner = self.inner.write().await;
            let now = Instant::now();
            let events = inner.take_expired(now);
            let rev = inner.next_revision();
            inner.kv.insert(
                key.to_string(),
                Entry {
                    value: value.clone(),
                    revision: rev,
                    expires_at: ttl_ms.map(|ms| now + Duration::from_millis(ms)),
                },
            );
            (rev, events)
        };
        events.push(WatchEvent {
            key: key.to_string(),
            value: Some(value),
            revision: rev,
        });
        self.emit(events);
        Ok(rev)
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>> {
        let (found, events) = {
            let mut inner = self.inner.write().await;
            let events = inner.take_expired(Instant::now());
            let found = inner.kv.get(key).map(|e| (e.value.clone(), e.revision));
            (found, events)
        };
        self.emit(events);
        Ok(found)
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let (rev, events) = {
            let mut inner = self.inner.write().await;
            let mut events = inner.take_expired(Instant::now());
            let existed = inner.kv.remove(key).is_some();
            let rev = inner.next_revision();
            if existed {
                events.push(WatchEvent {
                    key: key.to_string(),
                    value: None,
                    revision: rev,
                });
            }
            (rev, events)
        };
        self.emit(events);
        Ok(rev)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>, u64)>> {
        let (out, events) = {
            let mut inner = self.inner.write().await;
            let events = inner.take_expired(Instant::now());
            let out: Vec<(String, Vec<u8>, u64)> = inner
                .kv
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, e)| (k.clone(), e.value.clone(), e.revision))
                .collect();
            (out, events)
        };
        self.emit(events);
        Ok(out)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<(bool, u64)> {
        let (ok, rev, events) = {
            let mut inner = self.inner.write().await;
            let mut events = inner.take_expired(Instant::now());
            let current_rev = inner.kv.get(key).map(|e| e.revision).unwrap_or(0);
            if current_rev != expected_revision {
                (false, current_rev, events)
            } else {
                let rev = inner.next_revision();
                inner.kv.insert(
                    key.to_string(),
                    Entry {
                        value: value.clone(),
                        revision: rev,
                        expires_at: None,
                    },
                );
                events.push(WatchEvent {
                    key: key.to_string(),
                    value: Some(value),
                    revision: rev,
                });
                (true, rev, events)
            }
        };
        self.emit(events);
        Ok((ok, rev))
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream> {
        let prefix = prefix.to_string();
        let min_rev = start_revision_exclusive.unwrap_or(0);
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
            Ok(ev) if ev.revision > min_rev && ev.key.starts_with(&prefix) => Some(ev),
            _ => None,
        });
        Ok(Box::pin(stream))
    }
}
