//! Call-orchestration core of a multi-protocol telephony stack.
//!
//! This crate tracks every live call and its connection legs, routes
//! connection requests to the correct protocol endpoint, allocates shared
//! TCP/UDP/RTP port ranges, detects NAT presence and rewrites local
//! addresses, and reclaims call objects safely once they end, all under
//! concurrent access from many per-call tasks.
//!
//! Protocol endpoints (SIP, H.323, ...) are pluggable collaborators: they
//! implement [`Endpoint`] and produce [`Connection`] legs, and the engine
//! never looks inside their wire formats.

// Error handling
pub mod errors;

// Logging setup helpers
pub mod logging;

// Identifier and enumeration types
pub mod types;

// Engine configuration
pub mod config;

// The call object and its collaborator contracts
pub mod call;
pub mod connection;
pub mod endpoint;

// Call registry and deferred deletion
pub mod collector;
pub mod registry;

// Destination routing
pub mod routing;

// Shared port ranges
pub mod ports;

// NAT detection and translation
pub mod nat;

// Application lifecycle hooks
pub mod events;

// The orchestrator itself
pub mod engine;

// Public exports
pub use call::Call;
pub use config::EngineConfig;
pub use connection::Connection;
pub use endpoint::{ConnectionOptions, Endpoint, EndpointRegistry};
pub use engine::CallEngine;
pub use errors::{EngineError, Result};
pub use events::EngineEventHandler;
pub use nat::{NatCoordinator, StunClient, StunProbe};
pub use ports::{PortManager, PortRange};
pub use registry::{CallReadGuard, CallRegistry, CallSlot, CallWriteGuard, ClearedCall};
pub use routing::{RouteEntry, RouteTable};
pub use types::{CallEndReason, CallToken, InterfaceEvent, NatType};

/// Re-export of the most commonly used types.
pub mod prelude {
    pub use super::{
        Call, CallEndReason, CallEngine, CallToken, Connection, ConnectionOptions, Endpoint,
        EngineConfig, EngineError, EngineEventHandler, InterfaceEvent, NatType, Result, StunProbe,
    };
}
