//! Inbound notification processing
//!
//! Pure request-side logic: authenticate each entry against the shared
//! clientState secret, drop redeliveries, and hand the rest to the sink.
//! HTTP mechanics live in `server`; this module never sees a socket.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

/// Redelivery window: how many recently seen notification keys are remembered.
const DEDUP_CAPACITY: usize = 1024;

/// One change notification as delivered by Graph.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub change_type: String,
    pub resource: String,
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationBatch {
    #[serde(default)]
    value: Vec<Notification>,
}

/// Downstream consumer of authenticated notifications. A handler failure is
/// isolated to its entry; the batch is acknowledged regardless.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn handle(&self, change_type: &str, resource: &str) -> anyhow::Result<()>;
}

/// Sliding window of recently dispatched notification keys.
struct DedupWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Record a key. Returns false if it was already in the window.
    fn insert(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

/// Per-process notification processor. Safe under concurrent invocation: the
/// secret and sink are read-only, the dedup window is behind a mutex.
pub struct WebhookReceiver {
    client_state: String,
    sink: Arc<dyn NotificationSink>,
    seen: Mutex<DedupWindow>,
}

impl WebhookReceiver {
    pub fn new(client_state: String, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            client_state,
            sink,
            seen: Mutex::new(DedupWindow::new(DEDUP_CAPACITY)),
        }
    }

    /// Split a batch into entries trusted by their clientState and rejected
    /// ones. An absent clientState is trusted (Graph omits it when the
    /// subscription was created without one).
    pub fn partition(&self, entries: Vec<Notification>) -> (Vec<Notification>, Vec<Notification>) {
        entries.into_iter().partition(|n| match n.client_state.as_deref() {
            Some(state) => state == self.client_state,
            None => true,
        })
    }

    /// Process one POST body. A malformed or missing body is a batch of zero
    /// entries, never an error. Returns the number of dispatched entries.
    pub async fn process(&self, body: &[u8]) -> usize {
        tracing::debug!("raw notification payload: {}", String::from_utf8_lossy(body));

        let batch: NotificationBatch = match serde_json::from_slice(body) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::debug!("unparseable notification body ({e}), treating as empty");
                NotificationBatch::default()
            }
        };
        tracing::debug!("received {} notification(s)", batch.value.len());

        let (trusted, rejected) = self.partition(batch.value);
        for n in &rejected {
            tracing::warn!(
                "clientState mismatch, ignoring notification for {}",
                n.resource
            );
        }

        let mut dispatched = 0;
        for n in trusted {
            if !self.mark_seen(&n).await {
                tracing::debug!("duplicate delivery for {}, skipping", n.resource);
                continue;
            }
            dispatched += 1;
            if let Err(e) = self.sink.handle(&n.change_type, &n.resource).await {
                tracing::warn!("sink failed for {}: {:#}", n.resource, e);
            }
        }
        dispatched
    }

    async fn mark_seen(&self, n: &Notification) -> bool {
        let key = format!(
            "{}|{}|{}",
            n.subscription_id.as_deref().unwrap_or_default(),
            n.change_type,
            n.resource
        );
        self.seen.lock().await.insert(key)
    }
}
