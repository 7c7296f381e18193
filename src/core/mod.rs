//! Top-level run orchestration

mod orchestrator;

pub use orchestrator::{RunReport, SyncOrchestrator};
