//! Wire protocol for the Zeus gateway.
//!
//! Three pieces: [`envelope`] (frame normalization for the nested and
//! legacy-flat forms), [`command`] (the client command set as a tagged sum),
//! and [`event`] (gateway → client frames plus the worker contract shapes).

pub mod command;
pub mod envelope;
pub mod event;

pub use command::{ClientCommand, ForwardKind};
pub use envelope::Envelope;
pub use event::{
    is_terminal_event, GatewayEvent, ProviderSummary, StatusSnapshot, StreamSource,
    WorkerHealthReply, WorkerHello, WorkerStatusReply, TERMINAL_EVENTS,
};
