//! Glucowatch server library
//!
//! Alert evaluation on reading ingestion, caregiver notifications, the weekly
//! digest job and the handler entry points an HTTP layer mounts. The
//! `glucowatch-server` binary wires these together.

pub mod alerting;
pub mod analytics;
pub mod audit;
pub mod config;
pub mod handlers;
pub mod notifier;
pub mod reports;
pub mod scheduler;
pub mod storage;
