//! The connection collaborator contract.
//!
//! A connection is one protocol-specific leg of a call (the inbound or
//! outbound signaling party). Protocol crates implement this trait; the
//! engine only ever sees connections through it.

use async_trait::async_trait;

use crate::types::CallEndReason;

/// One leg of a call, implemented by a protocol endpoint.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The reason this leg ended, if it has.
    fn call_end_reason(&self) -> Option<CallEndReason>;

    /// The destination address this leg was asked to reach, as dialed.
    ///
    /// Used by the routing algorithm to resolve the B-party when the call
    /// has no pre-set party B.
    fn destination_address(&self) -> String;

    /// Whether media for the given session can bypass this leg entirely.
    fn is_media_bypass_possible(&self, session_id: u32) -> bool;

    /// Start the signaling exchange for this leg.
    ///
    /// Returns `false` when setup failed; the reason is then available from
    /// [`Connection::call_end_reason`].
    async fn set_up_connection(&self) -> bool;
}
