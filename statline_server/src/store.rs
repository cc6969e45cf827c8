//! Durable storage and alerting collaborators.
//!
//! The service only needs upsert-by-key semantics from storage: one status
//! snapshot per tenant, and one finalized aggregate per
//! (tenant, time bucket, path, type).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statline_core::{Folded, MetricType, Result, Status};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub tenant: String,
    pub status: Status,
}

/// A one-period aggregate of the dirty partials of one (type, path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub tenant: String,
    #[serde(rename = "dte")]
    pub bucket: DateTime<Utc>,
    pub typ: MetricType,
    #[serde(rename = "pth")]
    pub path: String,
    #[serde(flatten)]
    pub folded: Folded,
}

pub type AggregateKey = (String, DateTime<Utc>, String, MetricType);

impl AggregateRecord {
    pub fn key(&self) -> AggregateKey {
        (
            self.tenant.clone(),
            self.bucket,
            self.path.clone(),
            self.typ,
        )
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// The last persisted status of `tenant`, if any.
    async fn load_status(&self, tenant: &str) -> Result<Option<Status>>;

    async fn upsert_status(&self, snapshot: &StatusSnapshot) -> Result<()>;

    async fn upsert_aggregate(&self, record: &AggregateRecord) -> Result<()>;
}

/// Receives every finalized aggregate as it is committed.
pub trait AlertSink: Send + Sync {
    fn add_partial(&self, record: &AggregateRecord);
}

/// Keeps everything in process memory, for tests and single-node demos.
///
/// Nothing is persisted across restarts. Aggregates accumulate one record per
/// (tenant, bucket, path, type) unless a history window is set with
/// [`MemoryStore::with_history`].
#[derive(Default)]
pub struct MemoryStore {
    statuses: RwLock<HashMap<String, StatusSnapshot>>,
    aggregates: RwLock<BTreeMap<AggregateKey, AggregateRecord>>,
    history: Option<chrono::Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops aggregates whose bucket is more than `history` older than the
    /// newest stored bucket.
    pub fn with_history(history: Duration) -> Self {
        Self {
            history: chrono::Duration::from_std(history).ok(),
            ..Self::default()
        }
    }

    pub async fn status(&self, tenant: &str) -> Option<StatusSnapshot> {
        self.statuses.read().await.get(tenant).cloned()
    }

    pub async fn aggregates(&self) -> Vec<AggregateRecord> {
        self.aggregates.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_status(&self, tenant: &str) -> Result<Option<Status>> {
        Ok(self
            .statuses
            .read()
            .await
            .get(tenant)
            .map(|snapshot| snapshot.status.clone()))
    }

    async fn upsert_status(&self, snapshot: &StatusSnapshot) -> Result<()> {
        self.statuses
            .write()
            .await
            .insert(snapshot.tenant.clone(), snapshot.clone());
        Ok(())
    }

    async fn upsert_aggregate(&self, record: &AggregateRecord) -> Result<()> {
        let mut aggregates = self.aggregates.write().await;
        aggregates.insert(record.key(), record.clone());

        let Some(history) = self.history else {
            return Ok(());
        };
        let cutoff = aggregates
            .values()
            .map(|stored| stored.bucket)
            .max()
            .and_then(|newest| newest.checked_sub_signed(history));
        if let Some(cutoff) = cutoff {
            let before = aggregates.len();
            aggregates.retain(|_, stored| stored.bucket >= cutoff);
            let pruned = before - aggregates.len();
            if pruned > 0 {
                debug!("pruned {} aggregate(s) older than {}", pruned, cutoff);
            }
        }
        Ok(())
    }
}

/// Logs each aggregate. Stands in for an alert engine.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn add_partial(&self, record: &AggregateRecord) {
        info!(
            tenant = %record.tenant,
            bucket = %record.bucket,
            "{} {} sum={} cnt={} min={} max={}",
            record.typ,
            record.path,
            record.folded.sum,
            record.folded.count,
            record.folded.min,
            record.folded.max
        );
    }
}

/// Forwards aggregates to a channel.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<AggregateRecord>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AggregateRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn add_partial(&self, record: &AggregateRecord) {
        let _ = self.tx.send(record.clone());
    }
}
