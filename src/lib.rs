//! # Fleet Telemetry Library
//!
//! Telematics sync and historical backfill: provider client, run coordinator,
//! backfill controller, storage, and the HTTP surface over them.

pub mod backfill;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sync;
pub mod telemetry;
pub use migration;
