use parking_lot::Mutex;
use statline_core::{ByType, Partial, PartialBatch, Result, StatlineError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Best-effort push of partial batches to `PUT /agg`.
///
/// Only the latest push is ever in flight: starting a push aborts the
/// previous one if it has not completed. Failures are logged and dropped.
pub struct CommitChannel {
    client: reqwest::Client,
    url: String,
    auth: String,
    debug: bool,
    outstanding: Mutex<Option<JoinHandle<()>>>,
}

impl CommitChannel {
    pub fn new(server_url: &str, auth: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/agg", server_url.trim_end_matches('/')),
            auth: auth.into(),
            debug: false,
            outstanding: Mutex::new(None),
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sends `partials` in the background. Must be called within a tokio runtime.
    pub fn push(&self, partials: ByType<Partial>) {
        let batch = PartialBatch::new(partials);
        if self.debug {
            match serde_json::to_string(&batch) {
                Ok(json) => debug!("Pushing batch: {}", json),
                Err(e) => debug!("Pushing batch ({} partials, unprintable: {})", batch.prt.len(), e),
            }
        }

        let mut outstanding = self.outstanding.lock();
        if let Some(previous) = outstanding.take() {
            if !previous.is_finished() {
                debug!("Aborting outstanding push [{}]", self.auth);
            }
            previous.abort();
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let auth = self.auth.clone();
        *outstanding = Some(tokio::spawn(async move {
            if let Err(e) = send_batch(&client, &url, &auth, &batch).await {
                warn!("/agg push dropped: {} [{}]", e, auth);
            }
        }));
    }

    /// Whether a push is still in flight.
    pub fn is_pushing(&self) -> bool {
        self.outstanding
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Aborts the in-flight push, if any.
    pub fn abort(&self) {
        if let Some(handle) = self.outstanding.lock().take() {
            handle.abort();
        }
    }
}

async fn send_batch(
    client: &reqwest::Client,
    url: &str,
    auth: &str,
    batch: &PartialBatch,
) -> Result<()> {
    let response = client
        .put(url)
        .query(&[("auth", auth)])
        .json(batch)
        .send()
        .await
        .map_err(|e| StatlineError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(StatlineError::Network(format!("rejected with {}", status)));
    }
    debug!("/agg {} [{}]", status, auth);
    Ok(())
}

impl Drop for CommitChannel {
    fn drop(&mut self) {
        self.abort();
    }
}
