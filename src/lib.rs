//! Rollcall - heartbeat-driven service registry
//!
//! Services announce themselves with periodic heartbeats; the registry keeps
//! each one live for a TTL past its latest heartbeat and fans out a message
//! to every live service on a fixed tick.
//!
//! ## Components
//!
//! - **Client**: heartbeat manager, one periodic task per announced service
//! - **Registry**: fingerprint-keyed entries with update-if-newer refresh
//! - **Store**: pluggable backing store (in-memory or MongoDB) with versioned writes
//! - **Cleanup**: background sweep of long-expired entries
//! - **Dispatcher**: concurrent per-tick delivery to live services
//! - **Server**: HTTP registration, listing, health and version routes

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod logging;
pub mod registry;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;

pub use config::{Args, ClientArgs};
pub use registry::{Registry, RegistryConfig};
pub use server::{run, AppState};
pub use types::{Result, RollcallError, Service};
