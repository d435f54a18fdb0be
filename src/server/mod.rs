//! HTTP front end

pub mod http;

pub use http::{run, serve, AppState};
