//! Game lifecycle tracking and the settlement queue it feeds.
//!
//! The `lifecycle` binary runs ingestion, the health sweeps and the HTTP API.
//! An external settlement worker links this library and drives
//! [`lifecycle::queue`] (`claim_next`, then `mark_done` or `mark_failed`).

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod scheduler;
pub mod state;
pub mod sync;
pub mod types;
