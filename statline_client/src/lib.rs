//! Client agent for instrumented processes.
//!
//! Observations are captured into a [`LocalAggregator`], flushed into
//! partial aggregates every push period and sent to the aggregation service
//! over a [`CommitChannel`]. When a process name is configured, a
//! [`LivenessBeacon`] keeps a long-poll open so the service can track uptime
//! and deliver the kill switch.

pub mod agent;
pub mod aggregator;
pub mod beacon;
pub mod channel;

#[cfg(test)]
mod testing;

pub use agent::Agent;
pub use aggregator::{LocalAggregator, Observation};
pub use beacon::{Backoff, KillHandler, LivenessBeacon, PollOutcome};
pub use channel::CommitChannel;
