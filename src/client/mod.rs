//! Client side: announcing services to the registry
//!
//! - `announcer` - one heartbeat over HTTP
//! - `heartbeat` - periodic heartbeat tasks keyed by service fingerprint

pub mod announcer;
pub mod heartbeat;

pub use announcer::{Announcer, HttpAnnouncer};
pub use heartbeat::{HeartbeatManager, DEFAULT_HEARTBEAT_INTERVAL};
