pub mod commit;
pub mod environment;
pub mod environments;
pub mod http;
pub mod process;
pub mod store;

pub use commit::{commit_environment, CommitOutcome, CommitScheduler};
pub use environment::{CommitBatch, Environment, WindowEntry};
pub use environments::Environments;
pub use http::{router, AppState};
pub use process::{KillButton, ProcessInfo, ProcessRegistry, ProcessState, ProcessUpdate};
pub use store::{
    AggregateRecord, AlertSink, ChannelAlertSink, MemoryStore, StatusSnapshot, Store,
    TracingAlertSink,
};

// Re-export commonly used types
pub use async_trait::async_trait;
