//! Shared types

pub mod error;
pub mod service;

pub use error::{Result, RollcallError};
pub use service::{Fingerprint, Service};
