use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statline_core::{Result, StatlineError};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Delivers the kill signal to one open long-poll.
pub type KillButton = Box<dyn FnOnce() + Send>;

struct Button {
    id: Uuid,
    registered_at: Instant,
    kill: KillButton,
}

struct ProcessRecord {
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    buttons: Vec<Button>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub status: ProcessState,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Notification published whenever the set of live buttons changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessUpdate {
    Added { name: String },
    Swept { removed: usize },
    Killed { name: String, buttons: usize },
}

/// Liveness state of the processes registered by one tenant.
///
/// A process is up while it holds at least one button. Each open long-poll
/// registers a button; buttons older than the liveness timeout are dropped by
/// [`ProcessRegistry::sweep`].
pub struct ProcessRegistry {
    liveness_timeout: Duration,
    processes: BTreeMap<String, ProcessRecord>,
    updates: broadcast::Sender<ProcessUpdate>,
}

impl ProcessRegistry {
    pub fn new(liveness_timeout: Duration) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            liveness_timeout,
            processes: BTreeMap::new(),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessUpdate> {
        self.updates.subscribe()
    }

    pub fn add_process(&mut self, name: &str, kill: KillButton) -> Uuid {
        self.add_process_at(name, kill, Instant::now())
    }

    pub fn add_process_at(&mut self, name: &str, kill: KillButton, now: Instant) -> Uuid {
        let seen = Utc::now();
        let record = self
            .processes
            .entry(name.to_string())
            .or_insert_with(|| ProcessRecord {
                first_seen: seen,
                last_seen: seen,
                buttons: Vec::new(),
            });
        record.last_seen = seen;

        let id = Uuid::new_v4();
        record.buttons.push(Button {
            id,
            registered_at: now,
            kill,
        });
        debug!("Process '{}' holds {} button(s)", name, record.buttons.len());

        self.notify(ProcessUpdate::Added {
            name: name.to_string(),
        });
        id
    }

    /// Drops buttons older than the liveness timeout. Returns how many went.
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let timeout = self.liveness_timeout;
        let mut removed = 0;
        for record in self.processes.values_mut() {
            let before = record.buttons.len();
            record
                .buttons
                .retain(|button| now.saturating_duration_since(button.registered_at) < timeout);
            removed += before - record.buttons.len();
        }

        if removed > 0 {
            self.notify(ProcessUpdate::Swept { removed });
        }
        removed
    }

    /// Presses every button held by `name` and forgets them.
    pub fn kill_process(&mut self, name: &str) -> Result<usize> {
        let buttons = match self.processes.get_mut(name) {
            Some(record) if !record.buttons.is_empty() => std::mem::take(&mut record.buttons),
            _ => return Err(StatlineError::NoActiveProcess(name.to_string())),
        };

        let count = buttons.len();
        info!("Killing process '{}' ({} open poll(s))", name, count);
        for button in buttons {
            debug!("Pressing button {}", button.id);
            (button.kill)();
        }

        self.notify(ProcessUpdate::Killed {
            name: name.to_string(),
            buttons: count,
        });
        Ok(count)
    }

    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.processes
            .iter()
            .map(|(name, record)| ProcessInfo {
                name: name.clone(),
                status: if record.buttons.is_empty() {
                    ProcessState::Down
                } else {
                    ProcessState::Up
                },
                first_seen: record.first_seen,
                last_seen: record.last_seen,
            })
            .collect()
    }

    pub fn status(&self, name: &str) -> Option<ProcessState> {
        self.processes.get(name).map(|record| {
            if record.buttons.is_empty() {
                ProcessState::Down
            } else {
                ProcessState::Up
            }
        })
    }

    fn notify(&self, update: ProcessUpdate) {
        // no subscribers is fine
        let _ = self.updates.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_button(counter: &Arc<AtomicUsize>) -> KillButton {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_add_process_marks_up() {
        let mut registry = ProcessRegistry::new(Duration::from_secs(40));
        registry.add_process("worker", Box::new(|| {}));

        assert_eq!(registry.status("worker"), Some(ProcessState::Up));
        assert_eq!(registry.status("other"), None);

        let listed = registry.processes();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "worker");
        assert!(listed[0].first_seen <= listed[0].last_seen);
    }

    #[test]
    fn test_first_seen_kept_last_seen_updated() {
        let mut registry = ProcessRegistry::new(Duration::from_secs(40));
        registry.add_process("worker", Box::new(|| {}));
        let first = registry.processes()[0].clone();

        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.add_process("worker", Box::new(|| {}));
        let second = registry.processes()[0].clone();

        assert_eq!(first.first_seen, second.first_seen);
        assert!(second.last_seen > first.last_seen);
    }

    #[test]
    fn test_kill_without_buttons_fails() {
        let mut registry = ProcessRegistry::new(Duration::from_secs(40));
        assert!(matches!(
            registry.kill_process("x"),
            Err(StatlineError::NoActiveProcess(_))
        ));
    }

    #[test]
    fn test_kill_presses_every_button() {
        let mut registry = ProcessRegistry::new(Duration::from_secs(40));
        let pressed = Arc::new(AtomicUsize::new(0));
        registry.add_process("worker", counting_button(&pressed));
        registry.add_process("worker", counting_button(&pressed));

        assert_eq!(registry.kill_process("worker").unwrap(), 2);
        assert_eq!(pressed.load(Ordering::SeqCst), 2);
        assert_eq!(registry.status("worker"), Some(ProcessState::Down));

        // the buttons are gone, a second kill has nothing to press
        assert!(registry.kill_process("worker").is_err());
    }

    #[test]
    fn test_sweep_expires_stale_buttons() {
        let mut registry = ProcessRegistry::new(Duration::from_secs(40));
        let t0 = Instant::now();
        registry.add_process_at("worker", Box::new(|| {}), t0);
        registry.add_process_at("worker", Box::new(|| {}), t0 + Duration::from_secs(30));

        assert_eq!(registry.sweep_at(t0 + Duration::from_secs(39)), 0);
        assert_eq!(registry.sweep_at(t0 + Duration::from_secs(40)), 1);
        assert_eq!(registry.status("worker"), Some(ProcessState::Up));

        assert_eq!(registry.sweep_at(t0 + Duration::from_secs(70)), 1);
        assert_eq!(registry.status("worker"), Some(ProcessState::Down));
    }

    #[test]
    fn test_updates_are_published() {
        let mut registry = ProcessRegistry::new(Duration::from_secs(40));
        let mut updates = registry.subscribe();

        let t0 = Instant::now();
        registry.add_process_at("worker", Box::new(|| {}), t0);
        registry.sweep_at(t0 + Duration::from_secs(41));

        assert_eq!(
            updates.try_recv().unwrap(),
            ProcessUpdate::Added {
                name: "worker".to_string()
            }
        );
        assert_eq!(
            updates.try_recv().unwrap(),
            ProcessUpdate::Swept { removed: 1 }
        );
    }
}
