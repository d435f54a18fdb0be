//! Configuration for Rollcall
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::dispatcher::DispatcherConfig;
use crate::registry::RegistryConfig;

/// Where registry entries are kept
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Process-local map; entries vanish on restart
    Memory,
    /// Shared MongoDB collection; several instances may share it
    Mongo,
}

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Rollcall - service registry with heartbeat expiry and message fan-out
#[derive(Parser, Debug, Clone)]
#[command(name = "rollcall")]
#[command(about = "Service registry with heartbeat expiry and message fan-out")]
pub struct Args {
    /// Unique identifier for this registry instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:10812")]
    pub listen: SocketAddr,

    /// Backing store for registry entries
    #[arg(long, env = "BACKEND", value_enum, default_value = "memory")]
    pub backend: Backend,

    /// MongoDB connection URI (mongo backend)
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name (mongo backend)
    #[arg(long, env = "MONGODB_DB", default_value = "rollcall")]
    pub mongodb_db: String,

    /// MongoDB collection holding registry entries (mongo backend)
    #[arg(long, env = "MONGODB_COLLECTION", default_value = "services")]
    pub mongodb_collection: String,

    /// Seconds an entry stays live without a heartbeat
    #[arg(long, env = "SERVICE_TTL_SECS", default_value = "60")]
    pub service_ttl_secs: u64,

    /// Seconds an expired entry is kept before deletion
    #[arg(long, env = "CLEANUP_GRACE_SECS", default_value = "600")]
    pub cleanup_grace_secs: u64,

    /// Seconds between cleanup sweeps
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value = "30")]
    pub cleanup_interval_secs: u64,

    /// Run the fan-out dispatcher in this process
    #[arg(long, env = "DISPATCH_ENABLED", default_value = "true", action = clap::ArgAction::Set)]
    pub dispatch_enabled: bool,

    /// Milliseconds between dispatch ticks
    #[arg(long, env = "DISPATCH_INTERVAL_MS", default_value = "1000")]
    pub dispatch_interval_ms: u64,

    /// Per-delivery request timeout in milliseconds
    #[arg(long, env = "DISPATCH_TIMEOUT_MS", default_value = "5000")]
    pub dispatch_timeout_ms: u64,

    /// Maximum deliveries in flight at once
    #[arg(long, env = "DISPATCH_MAX_IN_FLIGHT", default_value = "256")]
    pub dispatch_max_in_flight: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Args {
    /// Registry settings derived from the arguments
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            ttl: Duration::from_secs(self.service_ttl_secs),
            cleanup_grace: Duration::from_secs(self.cleanup_grace_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
        }
    }

    /// Dispatcher settings derived from the arguments
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            interval: Duration::from_millis(self.dispatch_interval_ms),
            timeout: Duration::from_millis(self.dispatch_timeout_ms),
            max_in_flight: self.dispatch_max_in_flight,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.service_ttl_secs == 0 {
            return Err("SERVICE_TTL_SECS must be greater than zero".to_string());
        }
        if self.cleanup_interval_secs == 0 {
            return Err("CLEANUP_INTERVAL_SECS must be greater than zero".to_string());
        }
        if self.dispatch_enabled {
            if self.dispatch_interval_ms == 0 {
                return Err("DISPATCH_INTERVAL_MS must be greater than zero".to_string());
            }
            if self.dispatch_timeout_ms == 0 {
                return Err("DISPATCH_TIMEOUT_MS must be greater than zero".to_string());
            }
            if self.dispatch_max_in_flight == 0 {
                return Err("DISPATCH_MAX_IN_FLIGHT must be greater than zero".to_string());
            }
            if self.dispatch_max_in_flight > Semaphore::MAX_PERMITS {
                return Err(format!(
                    "DISPATCH_MAX_IN_FLIGHT must be at most {}",
                    Semaphore::MAX_PERMITS
                ));
            }
        }
        if self.backend == Backend::Mongo && self.mongodb_uri.is_empty() {
            return Err("MONGODB_URI is required for the mongo backend".to_string());
        }
        Ok(())
    }
}

/// Rollcall client - announces a callback endpoint and prints what it receives
#[derive(Parser, Debug, Clone)]
#[command(name = "rollcall-client")]
#[command(about = "Announce a callback endpoint to a Rollcall registry")]
pub struct ClientArgs {
    /// Registration endpoint of the registry
    #[arg(long, env = "REGISTRY_URL", default_value = "http://127.0.0.1:10812/register")]
    pub registry_url: String,

    /// Seconds between heartbeats
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "3")]
    pub heartbeat_interval_secs: u64,

    /// Address the callback server listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:10813")]
    pub listen: SocketAddr,

    /// Address announced to the registry
    #[arg(long, env = "ADVERTISE_ADDRESS", default_value = "localhost")]
    pub advertise_address: String,

    /// Port announced to the registry (defaults to the listen port)
    #[arg(long, env = "ADVERTISE_PORT")]
    pub advertise_port: Option<u16>,

    /// Callback path announced to the registry
    #[arg(long, env = "ENDPOINT", default_value = "/message")]
    pub endpoint: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl ClientArgs {
    /// Time between heartbeats
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Port announced to the registry
    pub fn advertised_port(&self) -> u16 {
        self.advertise_port.unwrap_or(self.listen.port())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval_secs == 0 {
            return Err("HEARTBEAT_INTERVAL_SECS must be greater than zero".to_string());
        }
        if self.advertise_address.is_empty() {
            return Err("ADVERTISE_ADDRESS must not be empty".to_string());
        }
        if !self.endpoint.starts_with('/') {
            return Err("ENDPOINT must start with '/'".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["rollcall"]);
        assert_eq!(args.listen.port(), 10812);
        assert_eq!(args.backend, Backend::Memory);
        assert!(args.dispatch_enabled);
        assert_eq!(args.registry_config().ttl, Duration::from_secs(60));
        assert_eq!(args.registry_config().cleanup_grace, Duration::from_secs(600));
        assert_eq!(args.dispatcher_config().interval, Duration::from_secs(1));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let args = Args::parse_from(["rollcall", "--service-ttl-secs", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_in_flight_cap() {
        let too_many = (Semaphore::MAX_PERMITS + 1).to_string();
        let args = Args::parse_from(["rollcall", "--dispatch-max-in-flight", too_many.as_str()]);
        assert!(args.validate().is_err());

        let max = Semaphore::MAX_PERMITS.to_string();
        let args = Args::parse_from(["rollcall", "--dispatch-max-in-flight", max.as_str()]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_dispatch_can_be_disabled() {
        let args = Args::parse_from([
            "rollcall",
            "--dispatch-enabled",
            "false",
            "--dispatch-interval-ms",
            "0",
        ]);
        assert!(!args.dispatch_enabled);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_mongo_backend_flag() {
        let args = Args::parse_from(["rollcall", "--backend", "mongo"]);
        assert_eq!(args.backend, Backend::Mongo);
    }

    #[test]
    fn test_client_defaults() {
        let args = ClientArgs::parse_from(["rollcall-client"]);
        assert_eq!(args.advertised_port(), 10813);
        assert_eq!(args.endpoint, "/message");
        assert_eq!(args.heartbeat_interval(), Duration::from_secs(3));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_client_rejects_relative_endpoint() {
        let args = ClientArgs::parse_from(["rollcall-client", "--endpoint", "message"]);
        assert!(args.validate().is_err());
    }
}
