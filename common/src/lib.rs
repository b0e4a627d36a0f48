// Shared library for the trigger scheduler, publish worker, and notifier.

pub mod circuit_breaker;
pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod lock;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod telemetry;
pub mod trigger;
