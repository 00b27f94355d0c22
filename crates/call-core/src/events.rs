//! Application lifecycle hooks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::call::Call;
use crate::connection::Connection;
use crate::types::{CallEndReason, CallToken};

/// Callbacks the engine fires at call lifecycle transitions.
///
/// All hooks default to no-ops; implementors override what they need.
#[async_trait]
pub trait EngineEventHandler: Send + Sync {
    /// An inbound connection arrived on `call`. Returning `false` refuses
    /// it before any routing happens.
    async fn on_incoming_connection(&self, _call: &Call, _connection: &Arc<dyn Connection>) -> bool {
        true
    }

    /// A call reached the established state.
    async fn on_call_established(&self, _token: &CallToken) {}

    /// A call was marked cleared. Fired at the mark, not at physical
    /// destruction; the call may still be draining.
    async fn on_call_cleared(&self, _token: &CallToken, _reason: CallEndReason) {}
}
