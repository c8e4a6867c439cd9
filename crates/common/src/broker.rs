//! Stream broker: an ordered, bounded, multi-consumer log keyed by a
//! monotonic string ID.
//!
//! Two backends sit behind one trait:
//!
//! - [`MemoryBroker`]: in-process log with blocking tail reads. Zero
//!   infrastructure; volatile across restarts (the event store is the
//!   durable record).
//! - [`RedisBroker`]: Redis Streams (`XADD` / `XREAD BLOCK` / `XREVRANGE`)
//!   for deployments where subscribers connect to more than one gateway
//!   process.
//!
//! ## Ordering
//!
//! IDs are `<ms>-<seq>` pairs compared numerically. If publish A returns
//! before publish B starts, every reader observes A before B. On overflow
//! the oldest entries are dropped, never the newest, so tail readers keep
//! working.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::Notify;
use tracing::info;

use crate::error::Result;

/// One item in the broker log.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub data: String,
}

/// Ordered multi-consumer log. Readers keep their own cursor; the broker
/// holds no per-consumer state.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Append `event_json` to the stream and return its assigned ID.
    async fn publish(&self, key: &str, event_json: &str) -> Result<String>;

    /// Return up to `max_count` entries strictly after `after_id`, blocking
    /// up to `max_block` when none exist yet. Empty on timeout.
    async fn read(
        &self,
        key: &str,
        after_id: &str,
        max_block: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// ID of the most recently published entry, or `0-0` for an empty
    /// stream. New subscribers start here (tail semantics).
    async fn latest_id(&self, key: &str) -> Result<String>;
}

/// `<ms>-<seq>` entry ID, compared as a numeric pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    fn parse(s: &str) -> Option<EntryId> {
        let (ms, seq) = s.split_once('-')?;
        Some(EntryId {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// Entries kept per stream before the oldest are evicted.
const DEFAULT_MAX_LEN: usize = 1024;

struct StreamState {
    entries: VecDeque<(EntryId, String)>,
    /// Last assigned ID; survives eviction so tail reads stay correct.
    last: Option<EntryId>,
}

struct MemoryStream {
    state: Mutex<StreamState>,
    notify: Notify,
}

/// In-process stream broker.
pub struct MemoryBroker {
    streams: Mutex<HashMap<String, Arc<MemoryStream>>>,
    max_len: usize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::bounded(DEFAULT_MAX_LEN)
    }

    pub fn bounded(max_len: usize) -> Self {
        MemoryBroker {
            streams: Mutex::new(HashMap::new()),
            max_len: max_len.max(1),
        }
    }

    fn stream(&self, key: &str) -> Arc<MemoryStream> {
        let mut streams = self.streams.lock().expect("broker map lock poisoned");
        streams
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryStream {
                    state: Mutex::new(StreamState {
                        entries: VecDeque::new(),
                        last: None,
                    }),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    fn next_id(last: Option<EntryId>) -> EntryId {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        match last {
            // Same-millisecond (or clock-regressed) publishes bump the
            // sequence so IDs stay strictly increasing.
            Some(last) if now_ms <= last.ms => EntryId {
                ms: last.ms,
                seq: last.seq + 1,
            },
            _ => EntryId { ms: now_ms, seq: 0 },
        }
    }
}

#[async_trait]
impl StreamBroker for MemoryBroker {
    async fn publish(&self, key: &str, event_json: &str) -> Result<String> {
        let stream = self.stream(key);
        let id = {
            let mut state = stream.state.lock().expect("stream lock poisoned");
            let id = Self::next_id(state.last);
            state.entries.push_back((id, event_json.to_string()));
            while state.entries.len() > self.max_len {
                state.entries.pop_front();
            }
            state.last = Some(id);
            id
        };
        stream.notify.notify_waiters();
        Ok(id.to_string())
    }

    async fn read(
        &self,
        key: &str,
        after_id: &str,
        max_block: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let stream = self.stream(key);
        let after = EntryId::parse(after_id).unwrap_or(EntryId::ZERO);
        let deadline = Instant::now() + max_block;

        loop {
            let notified = stream.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking so a publish between the check and
            // the await cannot be missed.
            notified.as_mut().enable();

            {
                let state = stream.state.lock().expect("stream lock poisoned");
                let batch: Vec<StreamEntry> = state
                    .entries
                    .iter()
                    .filter(|(id, _)| *id > after)
                    .take(max_count)
                    .map(|(id, data)| StreamEntry {
                        id: id.to_string(),
                        data: data.clone(),
                    })
                    .collect();
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(Vec::new());
            };
            if tokio::time::timeout(remaining, notified.as_mut())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn latest_id(&self, key: &str) -> Result<String> {
        let stream = self.stream(key);
        let state = stream.state.lock().expect("stream lock poisoned");
        Ok(state
            .last
            .map(|id| id.to_string())
            .unwrap_or_else(|| "0-0".to_string()))
    }
}

/// Entries kept in each Redis stream (`XADD MAXLEN ~`).
const REDIS_MAX_LEN: usize = 4096;

/// Redis Streams broker.
///
/// Publishes and tail lookups share one [`ConnectionManager`] (cheap to
/// clone per call, reconnects on failure). Blocking reads open their own
/// connection: `XREAD BLOCK` parks a connection for the whole window, and
/// the shared one must stay responsive for publishes.
pub struct RedisBroker {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(broker_url: &str) -> Result<Self> {
        info!("Connecting to stream broker at {}", broker_url);

        let client = redis::Client::open(broker_url)?;
        let manager = ConnectionManager::new(client.clone()).await?;

        info!("Stream broker connection established");
        Ok(RedisBroker { client, manager })
    }
}

#[async_trait]
impl StreamBroker for RedisBroker {
    async fn publish(&self, key: &str, event_json: &str) -> Result<String> {
        let mut conn = self.manager.clone();
        let id: String = redis::cmd("XADD")
            .arg(key)
            .arg("MAXLEN")
            .arg("~")
            .arg(REDIS_MAX_LEN)
            .arg("*")
            .arg("event")
            .arg(event_json)
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    async fn read(
        &self,
        key: &str,
        after_id: &str,
        max_block: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>> {
        type RawStreams = Vec<(String, Vec<(String, Vec<(String, String)>)>)>;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // Nil reply on block timeout, hence the Option.
        let result: Option<RawStreams> = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(max_count)
            .arg("BLOCK")
            .arg(max_block.as_millis() as u64)
            .arg("STREAMS")
            .arg(key)
            .arg(after_id)
            .query_async(&mut conn)
            .await?;

        let mut entries = Vec::new();
        if let Some(streams) = result {
            for (_stream_name, items) in streams {
                for (entry_id, fields) in items {
                    if let Some((_field, data)) =
                        fields.into_iter().find(|(field, _)| field == "event")
                    {
                        entries.push(StreamEntry {
                            id: entry_id,
                            data,
                        });
                    }
                }
            }
        }
        Ok(entries)
    }

    async fn latest_id(&self, key: &str) -> Result<String> {
        let mut conn = self.manager.clone();
        let latest: Vec<(String, Vec<(String, String)>)> = redis::cmd("XREVRANGE")
            .arg(key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;
        Ok(latest
            .into_iter()
            .next()
            .map(|(id, _)| id)
            .unwrap_or_else(|| "0-0".to_string()))
    }
}
