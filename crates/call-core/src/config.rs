//! Engine configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::nat::StunProbe;
use crate::types::CallEndReason;

/// Static configuration for [`crate::engine::CallEngine`].
///
/// Runtime-tunable knobs (port ranges, route table, STUN server, media
/// timeouts) live on the engine itself; this struct carries what is fixed
/// at construction.
#[derive(Clone)]
pub struct EngineConfig {
    /// Garbage collector period.
    pub collector_period: Duration,
    /// How long shutdown waits for the collector task to exit.
    pub shutdown_grace: Duration,
    /// End reason applied to calls still live at shutdown.
    pub shutdown_reason: CallEndReason,
    /// STUN resolver collaborator; `None` leaves NAT traversal disabled.
    pub stun_probe: Option<Arc<dyn StunProbe>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collector_period: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            shutdown_reason: CallEndReason::EndedByLocalUser,
            stun_probe: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collector_period(mut self, period: Duration) -> Self {
        self.collector_period = period;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_shutdown_reason(mut self, reason: CallEndReason) -> Self {
        self.shutdown_reason = reason;
        self
    }

    pub fn with_stun_probe(mut self, probe: Arc<dyn StunProbe>) -> Self {
        self.stun_probe = Some(probe);
        self
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("collector_period", &self.collector_period)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("shutdown_reason", &self.shutdown_reason)
            .field("stun_probe", &self.stun_probe.is_some())
            .finish()
    }
}
