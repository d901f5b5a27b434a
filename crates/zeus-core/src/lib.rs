//! Shared foundations for the Zeus gateway.
//!
//! This crate holds the pieces every other Zeus crate needs: the data model
//! ([`types`]), the error type ([`error`]), static configuration
//! ([`config`]), and the logging bootstrap ([`logging`]).

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{BackendKind, GatewayConfig, ProviderDefaults};
pub use error::{Result, ZeusError};
pub use logging::{init_logging, init_test_logging};
pub use types::{
    worker_id_for, ClientId, HealthState, LifecycleEvent, Provider, WorkerId, WorkerInfo,
    WorkerStatus,
};
