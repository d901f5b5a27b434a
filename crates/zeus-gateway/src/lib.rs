//! The Zeus gateway control plane.
//!
//! A concurrent event router multiplexing N client streams against M worker
//! streams. Clients connect over one bidirectional WebSocket and can submit
//! chat requests, manage the worker fleet (spawn/stop/scale), subscribe to
//! event streams from individual workers or whole provider pools, and push
//! per-provider runtime policy.
//!
//! # Architecture
//!
//! ```text
//! client ws ──► Router ──► Fleet ──► WorkerSupervisor ──► worker process
//!    ▲                       │            │
//!    │                       │            ▼ (event stream)
//!    └────── ClientHub ◄── Fanout ◄───────┘
//! ```
//!
//! The [`fleet::Fleet`] owns the worker lifecycle end to end: port
//! allocation, backend launch, readiness, the persistent stream, and the
//! graceful-then-forceful stop path. [`fanout::Fanout`] delivers each worker
//! event to the originating client (affinity) and to process/provider
//! subscribers, deduplicating. [`server::Gateway`] wires everything and owns
//! the accept loops.

pub mod config_store;
pub mod fanout;
pub mod fleet;
pub mod health;
pub mod hub;
pub mod launch;
pub mod pool;
pub mod ports;
pub mod registry;
pub mod router;
pub mod server;
pub mod supervisor;

pub use config_store::{ConfigStore, ConfigUpdate, ProviderConfig, ProviderConfigPatch};
pub use fanout::{Fanout, WorkerEvent};
pub use fleet::Fleet;
pub use health::HealthMonitor;
pub use hub::ClientHub;
pub use launch::{
    ContainerBackend, LaunchSpec, LogBuffer, SubprocessBackend, WorkerBackend, WorkerProcess,
};
pub use pool::ProviderPools;
pub use ports::PortAllocator;
pub use registry::WorkerRegistry;
pub use router::Router;
pub use server::Gateway;
pub use supervisor::WorkerSupervisor;
