use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Invoked when the service delivers the kill switch.
pub type KillHandler = Arc<dyn Fn() + Send + Sync>;

/// Result of one long-poll round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The response body matched `<auth>-<process>`.
    Kill,
    /// Any other response: the server released the poll.
    Heartbeat,
    /// Nobody is listening; the service is considered down.
    Refused,
    /// The connection was established, then dropped before a full answer
    /// came back (RST or a plain hang-up); transient.
    Reset,
    /// Any other transport failure.
    Failed(String),
}

impl PollOutcome {
    pub fn from_body(body: &str, auth: &str, process: &str) -> Self {
        if kill_signal(auth, process) == body {
            PollOutcome::Kill
        } else {
            PollOutcome::Heartbeat
        }
    }

    fn from_error(err: &reqwest::Error) -> Self {
        match io_error_kind(err) {
            Some(io::ErrorKind::ConnectionRefused) => PollOutcome::Refused,
            Some(
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof,
            ) => PollOutcome::Reset,
            _ if err.is_connect() => PollOutcome::Refused,
            _ if err.is_timeout() => PollOutcome::Failed(err.to_string()),
            // connected, then the server closed before completing the response
            _ if err.is_request() || err.is_body() => PollOutcome::Reset,
            _ => PollOutcome::Failed(err.to_string()),
        }
    }
}

/// The response body the service sends to kill `process`.
pub fn kill_signal(auth: &str, process: &str) -> String {
    format!("{}-{}", auth, process)
}

fn io_error_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = e.source();
    }
    None
}

/// Reconnection delay after refused connections.
///
/// The first refusal waits `base`; each consecutive refusal doubles the
/// wait up to `max`. A reset puts it back to `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    /// Returns the delay to wait after this refusal and doubles the next one.
    pub fn refused(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

#[derive(Debug, Serialize)]
struct Registration<'a> {
    auth: &'a str,
    process: &'a str,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Long-poll registration against `PUT /process`.
pub struct LivenessBeacon {
    client: reqwest::Client,
    url: String,
    auth: String,
    process: String,
    heartbeat_delay: Duration,
    backoff: Mutex<Backoff>,
    in_flight: AtomicBool,
    on_kill: KillHandler,
}

impl LivenessBeacon {
    pub fn new(
        server_url: &str,
        auth: impl Into<String>,
        process: impl Into<String>,
        heartbeat_delay: Duration,
        backoff: Backoff,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/process", server_url.trim_end_matches('/')),
            auth: auth.into(),
            process: process.into(),
            heartbeat_delay,
            backoff: Mutex::new(backoff),
            in_flight: AtomicBool::new(false),
            on_kill: Arc::new(terminate),
        }
    }

    pub fn with_kill_handler(mut self, on_kill: KillHandler) -> Self {
        self.on_kill = on_kill;
        self
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff.lock().clone()
    }

    /// Issues one long-poll. Returns `None` when a poll is already open.
    pub async fn poll_once(&self) -> Option<PollOutcome> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return None;
        }
        let _guard = InFlight(&self.in_flight);

        let registration = Registration {
            auth: &self.auth,
            process: &self.process,
        };
        let result = self
            .client
            .put(&self.url)
            .query(&[("auth", self.auth.as_str())])
            .json(&registration)
            .send()
            .await;

        let outcome = match result {
            Ok(response) => match response.text().await {
                Ok(body) => PollOutcome::from_body(&body, &self.auth, &self.process),
                Err(e) => PollOutcome::from_error(&e),
            },
            Err(e) => PollOutcome::from_error(&e),
        };
        Some(outcome)
    }

    /// How long to wait before the next poll. `None` once killed.
    pub fn next_delay(&self, outcome: &PollOutcome) -> Option<Duration> {
        let mut backoff = self.backoff.lock();
        match outcome {
            PollOutcome::Kill => None,
            PollOutcome::Heartbeat => Some(self.heartbeat_delay),
            PollOutcome::Refused => Some(backoff.refused()),
            PollOutcome::Reset => {
                backoff.reset();
                Some(self.heartbeat_delay)
            }
            PollOutcome::Failed(_) => Some(backoff.current()),
        }
    }

    /// Polls until the kill switch fires or `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Registering process '{}' for liveness", self.process);

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = self.poll_once() => outcome,
            };

            let Some(outcome) = outcome else {
                debug!("Long-poll already open for '{}'", self.process);
                return;
            };

            match &outcome {
                PollOutcome::Refused => warn!("/process refused [{}]", self.auth),
                PollOutcome::Failed(e) => warn!("/process failed: {} [{}]", e, self.auth),
                _ => {}
            }

            let Some(delay) = self.next_delay(&outcome) else {
                error!("Kill signal received for process '{}'", self.process);
                (self.on_kill)();
                return;
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn terminate() {
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::read_request;
    use axum::{routing::put, Json, Router};
    use std::sync::atomic::AtomicUsize;

    #[derive(serde::Deserialize)]
    struct Body {
        auth: String,
        process: String,
    }

    fn beacon(url: &str) -> LivenessBeacon {
        LivenessBeacon::new(
            url,
            "k3y",
            "worker",
            Duration::from_millis(10),
            Backoff::new(Duration::from_millis(10), Duration::from_millis(80)),
        )
    }

    #[test]
    fn test_kill_body_detection() {
        assert_eq!(
            PollOutcome::from_body("k3y-worker", "k3y", "worker"),
            PollOutcome::Kill
        );
        assert_eq!(
            PollOutcome::from_body("", "k3y", "worker"),
            PollOutcome::Heartbeat
        );
        assert_eq!(
            PollOutcome::from_body("k3y-worker\n", "k3y", "worker"),
            PollOutcome::Heartbeat
        );
        assert_eq!(
            PollOutcome::from_body("k3y-other", "k3y", "worker"),
            PollOutcome::Heartbeat
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(16));
        let delays: Vec<_> = (0..7).map(|_| backoff.refused().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16, 16]);

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn test_next_delay_policy() {
        let beacon = beacon("http://127.0.0.1:1");

        assert_eq!(beacon.next_delay(&PollOutcome::Kill), None);
        assert_eq!(
            beacon.next_delay(&PollOutcome::Heartbeat),
            Some(Duration::from_millis(10))
        );

        assert_eq!(
            beacon.next_delay(&PollOutcome::Refused),
            Some(Duration::from_millis(10))
        );
        assert_eq!(
            beacon.next_delay(&PollOutcome::Refused),
            Some(Duration::from_millis(20))
        );
        // backoff persists across polls until a reset
        assert_eq!(beacon.backoff().current(), Duration::from_millis(40));

        assert_eq!(
            beacon.next_delay(&PollOutcome::Reset),
            Some(Duration::from_millis(10))
        );
        assert_eq!(beacon.backoff().current(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_refused_connection_classified() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let beacon = beacon(&format!("http://{}", addr));
        assert_eq!(beacon.poll_once().await, Some(PollOutcome::Refused));
    }

    #[tokio::test]
    async fn test_server_hangup_resets_backoff() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                // consume the whole request, then close cleanly without answering
                read_request(&mut stream).await;
                drop(stream);
            }
        });

        let beacon = beacon(&format!("http://{}", addr));
        for _ in 0..3 {
            beacon.next_delay(&PollOutcome::Refused);
        }
        assert_eq!(beacon.backoff().current(), Duration::from_millis(80));

        let outcome = beacon.poll_once().await.unwrap();
        assert_eq!(outcome, PollOutcome::Reset);
        assert_eq!(
            beacon.next_delay(&outcome),
            Some(Duration::from_millis(10))
        );
        assert_eq!(beacon.backoff().current(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_second_poll_is_noop_while_one_is_open() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut stream, _)) = listener.accept().await {
                read_request(&mut stream).await;
                held.push(stream);
            }
        });

        let beacon = Arc::new(beacon(&format!("http://{}", addr)));
        let open = beacon.clone();
        let first = tokio::spawn(async move { open.poll_once().await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !beacon.in_flight.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(beacon.poll_once().await, None);
        assert!(!first.is_finished());

        first.abort();
        let _ = first.await;
        assert!(!beacon.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_kill_signal_stops_loop() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let app = Router::new().route(
            "/process",
            put(move |Json(body): Json<Body>| {
                let counter = counter.clone();
                async move {
                    // two heartbeats, then the kill switch
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        String::new()
                    } else {
                        kill_signal(&body.auth, &body.process)
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let killed = Arc::new(AtomicUsize::new(0));
        let kills = killed.clone();
        let beacon = beacon(&format!("http://{}", addr)).with_kill_handler(Arc::new(move || {
            kills.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::timeout(Duration::from_secs(5), beacon.run(CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(killed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_loop() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let beacon = beacon(&format!("http://{}", addr));
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), beacon.run(cancel))
            .await
            .unwrap();
        assert!(!beacon.in_flight.load(Ordering::SeqCst));
    }
}
