//! Core scheduling types: identifiers, task definitions, cron parsing,
//! fire-time computation and retry policy.

pub mod cron;
pub mod retry;
pub mod task;
pub mod trigger;
pub mod types;
