//! Telemetry ingestion and virtual energy-state engine for a remote solar
//! sensor unit.
//!
//! The crate is laid out following the Explicit Module Boundary Pattern
//! (EMBP): the binary only talks to `config`, `store`, and the `routes`
//! gateway; the modules below them (`ingest`, `estimator`, `integrator`,
//! `classifier`, `history`, `view`, `persistence`) stay internal to the
//! state engine.

pub mod classifier;
pub mod config;
pub mod estimator;
pub mod extract;
pub mod history;
pub mod ingest;
pub mod integrator;
pub mod models;
pub mod persistence;
pub mod routes;
pub mod store;
pub mod view;

pub use config::Config;
pub use history::{Clock, DayKeyPolicy, ManualClock, SystemClock};
pub use ingest::{Engine, IngestAck, IngestError};
pub use models::Snapshot;
pub use store::AppState;
pub use view::ViewPayload;
