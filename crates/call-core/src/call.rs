//! The call object: one logical telephony session spanning one or more
//! connection legs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::connection::Connection;
use crate::types::{CallEndReason, CallToken};

/// One logical call.
///
/// Owned by the call registry; connections are owned by the call. All
/// fields that change after creation sit behind their own short-lived
/// locks, so the registry's access-mode locking (see
/// [`crate::registry::CallRegistry::find_read_only`] and friends) stays an
/// access discipline rather than a data guard: a clear in reference mode
/// never waits for a read/write holder.
pub struct Call {
    token: CallToken,
    party_a: String,
    party_b: Mutex<String>,
    connections: Mutex<Vec<Arc<dyn Connection>>>,
    end_reason: Mutex<Option<CallEndReason>>,
    established: AtomicBool,
    created_at: Instant,
}

impl Call {
    pub(crate) fn new(token: CallToken, party_a: &str, party_b: &str) -> Self {
        Self {
            token,
            party_a: party_a.to_string(),
            party_b: Mutex::new(party_b.to_string()),
            connections: Mutex::new(Vec::new()),
            end_reason: Mutex::new(None),
            established: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    pub fn token(&self) -> &CallToken {
        &self.token
    }

    pub fn party_a(&self) -> &str {
        &self.party_a
    }

    pub fn party_b(&self) -> String {
        self.party_b.lock().clone()
    }

    pub fn set_party_b(&self, party_b: &str) {
        *self.party_b.lock() = party_b.to_string();
    }

    /// Append a connection leg. Called by endpoints from
    /// [`crate::endpoint::Endpoint::make_connection`].
    pub fn attach_connection(&self, connection: Arc<dyn Connection>) {
        self.connections.lock().push(connection);
    }

    /// The `index`-th leg, in attach order (0 = A-leg).
    pub fn connection(&self, index: usize) -> Option<Arc<dyn Connection>> {
        self.connections.lock().get(index).cloned()
    }

    /// Snapshot of all legs, in attach order.
    pub fn connections(&self) -> Vec<Arc<dyn Connection>> {
        self.connections.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    pub(crate) fn set_established(&self) {
        self.established.store(true, Ordering::Release);
    }

    /// The reason this call ended, or `None` while it is still live.
    pub fn end_reason(&self) -> Option<CallEndReason> {
        *self.end_reason.lock()
    }

    /// Whether the call has been marked cleared.
    pub fn is_cleared(&self) -> bool {
        self.end_reason.lock().is_some()
    }

    /// Record the end reason. The first caller wins; the stored reason is
    /// stable for the rest of the call's life.
    pub(crate) fn set_end_reason_once(&self, reason: CallEndReason) -> bool {
        let mut slot = self.end_reason.lock();
        if slot.is_some() {
            return false;
        }
        debug!("call {} cleared: {}", self.token, reason);
        *slot = Some(reason);
        true
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("token", &self.token)
            .field("party_a", &self.party_a)
            .field("party_b", &*self.party_b.lock())
            .field("connections", &self.connections.lock().len())
            .field("end_reason", &*self.end_reason.lock())
            .field("established", &self.established.load(Ordering::Relaxed))
            .finish()
    }
}
