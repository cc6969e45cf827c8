use crate::aggregator::LocalAggregator;
use crate::beacon::{Backoff, KillHandler, LivenessBeacon};
use crate::channel::CommitChannel;
use parking_lot::Mutex;
use statline_core::{ClientConfig, Result, StatlineError};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wires the aggregator, the commit channel and the liveness beacon together.
///
/// `start` opens capture and schedules a flush+push every push period, and
/// registers the process when a name is configured. `stop` closes capture and
/// cancels the flush schedule; the beacon keeps running until `shutdown` or
/// the kill switch.
pub struct Agent {
    config: ClientConfig,
    aggregator: Arc<LocalAggregator>,
    channel: Arc<CommitChannel>,
    beacon: Option<Arc<LivenessBeacon>>,
    flush_task: Mutex<Option<CancellationToken>>,
    beacon_task: Mutex<Option<CancellationToken>>,
}

impl Agent {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate().map_err(StatlineError::InvalidConfig)?;

        let aggregator = LocalAggregator::new(config.percentile).with_debug(config.debug);
        aggregator.stop();

        let channel =
            CommitChannel::new(&config.server_url, config.auth.clone()).with_debug(config.debug);

        let beacon = config.process_name().map(|process| {
            Arc::new(LivenessBeacon::new(
                &config.server_url,
                config.auth.clone(),
                process,
                config.heartbeat_delay,
                Backoff::new(config.backoff_base, config.backoff_max),
            ))
        });

        Ok(Self {
            aggregator: Arc::new(aggregator),
            channel: Arc::new(channel),
            beacon,
            flush_task: Mutex::new(None),
            beacon_task: Mutex::new(None),
            config,
        })
    }

    /// Replaces the default kill behaviour, which exits the process. Has no
    /// effect once the beacon is running.
    pub fn with_kill_handler(mut self, on_kill: KillHandler) -> Self {
        if let Some(beacon) = self.beacon.take() {
            self.beacon = Some(match Arc::try_unwrap(beacon) {
                Ok(beacon) => Arc::new(beacon.with_kill_handler(on_kill)),
                Err(shared) => shared,
            });
        }
        self
    }

    pub fn aggregator(&self) -> &LocalAggregator {
        &self.aggregator
    }

    pub fn capture(&self, path: &str, value: &str) {
        self.aggregator.capture(path, value);
    }

    /// True while a push is still in flight.
    pub fn is_pushing(&self) -> bool {
        self.channel.is_pushing()
    }

    pub fn is_running(&self) -> bool {
        self.flush_task.lock().is_some()
    }

    /// Must be called within a tokio runtime. Calling it while running does nothing.
    pub fn start(&self) {
        let mut flush_task = self.flush_task.lock();
        if flush_task.is_some() {
            return;
        }

        self.aggregator.start();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let aggregator = self.aggregator.clone();
        let channel = self.channel.clone();
        let period = self.config.push_period;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let partials = aggregator.flush();
                        if !partials.is_empty() {
                            channel.push(partials);
                        }
                    }
                }
            }
        });
        *flush_task = Some(cancel);
        info!("Agent started (push every {:?})", period);

        if let Some(beacon) = &self.beacon {
            let mut beacon_task = self.beacon_task.lock();
            if beacon_task.is_none() {
                let cancel = CancellationToken::new();
                let token = cancel.clone();
                let beacon = beacon.clone();
                tokio::spawn(async move { beacon.run(token).await });
                *beacon_task = Some(cancel);
            }
        }
    }

    /// Stops capture and the flush schedule. Calling it while stopped does nothing.
    pub fn stop(&self) {
        self.aggregator.stop();
        if let Some(cancel) = self.flush_task.lock().take() {
            cancel.cancel();
            info!("Agent stopped");
        }
    }

    /// Stops everything, including the liveness beacon and any outstanding push.
    pub fn shutdown(&self) {
        self.stop();
        if let Some(cancel) = self.beacon_task.lock().take() {
            cancel.cancel();
        }
        self.channel.abort();
    }

    /// Flushes and pushes immediately, outside the schedule.
    pub fn flush_now(&self) {
        let partials = self.aggregator.flush();
        if !partials.is_empty() {
            self.channel.push(partials);
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}
