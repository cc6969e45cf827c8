use crate::environment::Environment;
use crate::environments::Environments;
use crate::store::{AlertSink, Store};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: bool,
    pub records: usize,
    pub failures: usize,
}

/// Commits one environment.
///
/// The batch is taken under the environment lock; persistence runs after the
/// lock is released. A failed write is logged and not retried: the partials
/// it covered are already marked clean.
pub async fn commit_environment(
    env: &Mutex<Environment>,
    store: &dyn Store,
    alerts: &dyn AlertSink,
) -> CommitOutcome {
    let batch = {
        let mut env = env.lock().await;
        env.take_commit()
    };

    let Some(batch) = batch else {
        return CommitOutcome::default();
    };

    let tenant = batch.snapshot.tenant.clone();
    let mut outcome = CommitOutcome {
        committed: true,
        records: batch.records.len(),
        failures: 0,
    };

    if let Err(e) = store.upsert_status(&batch.snapshot).await {
        warn!("[{}] failed to store status: {}", tenant, e);
        outcome.failures += 1;
    }

    for record in &batch.records {
        if let Err(e) = store.upsert_aggregate(record).await {
            warn!(
                "[{}] failed to store aggregate {} {}: {}",
                tenant, record.typ, record.path, e
            );
            outcome.failures += 1;
        }
        alerts.add_partial(record);
    }

    debug!(
        "[{}] committed {} aggregate(s), {} failure(s)",
        tenant, outcome.records, outcome.failures
    );
    outcome
}

/// Drives the periodic commit and process sweep over every environment.
pub struct CommitScheduler {
    environments: Arc<Environments>,
    alerts: Arc<dyn AlertSink>,
    commit_period: Duration,
    sweep_interval: Duration,
}

impl CommitScheduler {
    pub fn new(
        environments: Arc<Environments>,
        alerts: Arc<dyn AlertSink>,
        commit_period: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            environments,
            alerts,
            commit_period,
            sweep_interval,
        }
    }

    /// Commits every environment concurrently. Returns one outcome per tenant.
    pub async fn commit_all(&self) -> Vec<CommitOutcome> {
        let store = self.environments.store();
        let envs = self.environments.all().await;
        let outcomes = join_all(
            envs.iter()
                .map(|env| commit_environment(env, store.as_ref(), self.alerts.as_ref())),
        )
        .await;

        let committed = outcomes.iter().filter(|o| o.committed).count();
        if committed > 0 {
            info!("Committed {} of {} environment(s)", committed, envs.len());
        }
        outcomes
    }

    /// Expires stale process buttons in every environment.
    pub async fn sweep_all(&self) -> usize {
        let mut removed = 0;
        for env in self.environments.all().await {
            removed += env.lock().await.sweep_processes();
        }
        if removed > 0 {
            debug!("Swept {} stale button(s)", removed);
        }
        removed
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = Instant::now();
            let mut commit = interval_at(start + self.commit_period, self.commit_period);
            let mut sweep = interval_at(start + self.sweep_interval, self.sweep_interval);
            commit.set_missed_tick_behavior(MissedTickBehavior::Delay);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "Commit scheduler running (commit every {:?}, sweep every {:?})",
                self.commit_period, self.sweep_interval
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = commit.tick() => {
                        self.commit_all().await;
                    }
                    _ = sweep.tick() => {
                        self.sweep_all().await;
                    }
                }
            }

            // final commit so nothing ingested is lost on shutdown
            self.commit_all().await;
            info!("Commit scheduler stopped");
        })
    }
}
