//! The call engine: the orchestration layer tying together the call
//! registry, endpoint dispatch, route table, port allocation and NAT
//! coordination.
//!
//! One engine is constructed per process (or per isolated stack) and owns
//! every process-lifetime service. Calls are created through it, connection
//! requests are dispatched through it, and it runs the garbage collector
//! that performs all deferred call destruction.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::call::Call;
use crate::collector::GarbageCollector;
use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::endpoint::{ConnectionOptions, Endpoint, EndpointRegistry};
use crate::errors::{EngineError, Result};
use crate::events::EngineEventHandler;
use crate::nat::NatCoordinator;
use crate::ports::PortManager;
use crate::registry::{CallReadGuard, CallRegistry, CallSlot, CallWriteGuard, ClearedCall};
use crate::routing::RouteTable;
use crate::types::{CallEndReason, CallToken, InterfaceEvent, NatType};

/// The orchestration core.
///
/// Construct with [`CallEngine::new`] (requires a running tokio runtime,
/// which hosts the collector and interface-monitor tasks) and tear down
/// with [`CallEngine::shutdown`].
pub struct CallEngine {
    config: EngineConfig,
    handler: Option<Arc<dyn EngineEventHandler>>,
    registry: Arc<CallRegistry>,
    endpoints: Arc<EndpointRegistry>,
    routes: RouteTable,
    ports: PortManager,
    nat: Arc<NatCoordinator>,
    collector: GarbageCollector,
    iface_tx: Mutex<Option<mpsc::UnboundedSender<InterfaceEvent>>>,
    iface_task: Mutex<Option<JoinHandle<()>>>,
    no_media_timeout: Mutex<Duration>,
    audio_jitter: Mutex<(Duration, Duration)>,
    shut: AtomicBool,
}

impl CallEngine {
    pub fn new(config: EngineConfig, handler: Option<Arc<dyn EngineEventHandler>>) -> Arc<Self> {
        let registry = Arc::new(CallRegistry::new());
        let endpoints = Arc::new(EndpointRegistry::new());
        let nat = Arc::new(NatCoordinator::new(config.stun_probe.clone()));

        let collector =
            GarbageCollector::spawn(registry.clone(), endpoints.clone(), config.collector_period);

        let (iface_tx, mut iface_rx) = mpsc::unbounded_channel();
        let monitor_nat = nat.clone();
        let iface_task = tokio::spawn(async move {
            while let Some(event) = iface_rx.recv().await {
                match event {
                    InterfaceEvent::Added(ip) => monitor_nat.on_interface_added(ip),
                    InterfaceEvent::Removed(ip) => monitor_nat.on_interface_removed(ip),
                }
            }
        });

        debug!("created call engine");
        Arc::new(Self {
            config,
            handler,
            registry,
            endpoints,
            routes: RouteTable::new(),
            ports: PortManager::new(),
            nat,
            collector,
            iface_tx: Mutex::new(Some(iface_tx)),
            iface_task: Mutex::new(Some(iface_task)),
            no_media_timeout: Mutex::new(Duration::from_secs(5 * 60)),
            audio_jitter: Mutex::new((Duration::from_millis(50), Duration::from_millis(250))),
            shut: AtomicBool::new(false),
        })
    }

    // ---- calls ----------------------------------------------------------

    /// Start a call from `party_a` to `party_b`.
    ///
    /// The A-leg is dispatched and set up in the caller's context; routing
    /// of the B-party happens when the A-leg reports its inbound
    /// connection. On failure the call is cleared with the A-leg's end
    /// reason and its token is dead.
    pub async fn set_up_call(&self, party_a: &str, party_b: &str) -> Result<CallToken> {
        if self.shut.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        info!("set up call from \"{}\" to \"{}\"", party_a, party_b);

        let (token, slot) = self.registry.create_call(party_a, party_b).await;

        match self.start_a_leg(&slot, party_a).await {
            Ok(()) => {
                debug!("set up call succeeded, call={}", token);
                Ok(token)
            }
            Err(e) => {
                let reason = slot
                    .connection(0)
                    .and_then(|c| c.call_end_reason())
                    .unwrap_or(CallEndReason::EndedByTemporaryFailure);
                drop(slot);
                if let Some(cleared) = self.registry.clear_call(&token, reason, None).await {
                    self.fire_cleared(&cleared).await;
                }
                Err(e)
            }
        }
    }

    async fn start_a_leg(&self, slot: &Arc<CallSlot>, party_a: &str) -> Result<()> {
        self.make_connection(slot, party_a, &ConnectionOptions::default())
            .await?;
        let connection = slot.connection(0).ok_or(EngineError::ConnectionFailed {
            reason: CallEndReason::EndedByTemporaryFailure,
        })?;
        if connection.set_up_connection().await {
            Ok(())
        } else {
            Err(EngineError::ConnectionFailed {
                reason: connection
                    .call_end_reason()
                    .unwrap_or(CallEndReason::EndedByTemporaryFailure),
            })
        }
    }

    /// Mark a call cleared. Physical destruction happens later, on the
    /// collector's context.
    pub async fn clear_call(&self, token: &CallToken, reason: CallEndReason) -> Result<()> {
        let cleared = self
            .registry
            .clear_call(token, reason, None)
            .await
            .ok_or_else(|| EngineError::CallNotFound {
                token: token.to_string(),
            })?;
        self.fire_cleared(&cleared).await;
        Ok(())
    }

    /// Mark a call cleared and block until the collector has actually
    /// destroyed it.
    pub async fn clear_call_synchronous(
        &self,
        token: &CallToken,
        reason: CallEndReason,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let cleared = self
            .registry
            .clear_call(token, reason, Some(tx))
            .await
            .ok_or_else(|| EngineError::CallNotFound {
                token: token.to_string(),
            })?;
        self.fire_cleared(&cleared).await;
        let _ = rx.await;
        Ok(())
    }

    /// Clear every live call; with `wait`, block until the collector has
    /// drained everything (calls and endpoint-owned resources).
    pub async fn clear_all_calls(&self, reason: CallEndReason, wait: bool) {
        let cleared = self.registry.clear_all(reason).await;
        for c in &cleared {
            self.fire_cleared(c).await;
        }
        if wait {
            self.registry.wait_all_cleared().await;
        }
    }

    async fn fire_cleared(&self, cleared: &ClearedCall) {
        info!(
            "cleared call {} from \"{}\" to \"{}\": {}",
            cleared.token, cleared.party_a, cleared.party_b, cleared.reason
        );
        if let Some(handler) = &self.handler {
            handler.on_call_cleared(&cleared.token, cleared.reason).await;
        }
    }

    pub async fn is_call_established(&self, token: &CallToken) -> bool {
        match self.registry.find_read_only(token).await {
            Some(call) => call.is_established(),
            None => false,
        }
    }

    /// Called by an endpoint when a call's legs are connected end to end.
    pub async fn on_established(&self, token: &CallToken) -> Result<()> {
        {
            let call =
                self.registry
                    .find_read_only(token)
                    .await
                    .ok_or_else(|| EngineError::CallNotFound {
                        token: token.to_string(),
                    })?;
            call.set_established();
        }
        if let Some(handler) = &self.handler {
            handler.on_call_established(token).await;
        }
        Ok(())
    }

    /// Shared-access lookup of a live call.
    pub async fn find_call(&self, token: &CallToken) -> Option<CallReadGuard> {
        self.registry.find_read_only(token).await
    }

    /// Exclusive-access lookup of a live call.
    pub async fn find_call_mut(&self, token: &CallToken) -> Option<CallWriteGuard> {
        self.registry.find_read_write(token).await
    }

    /// Media for `session_id` can bypass us only when both legs agree.
    pub async fn is_media_bypass_possible(&self, token: &CallToken, session_id: u32) -> bool {
        let Some(call) = self.registry.find_read_only(token).await else {
            return false;
        };
        let connections = call.connections();
        connections.len() >= 2
            && connections[0].is_media_bypass_possible(session_id)
            && connections[1].is_media_bypass_possible(session_id)
    }

    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.registry
    }

    // ---- endpoint dispatch ----------------------------------------------

    pub async fn attach_endpoint(&self, endpoint: Arc<dyn Endpoint>) {
        self.endpoints.attach(endpoint).await;
    }

    pub async fn detach_endpoint(&self, endpoint: &Arc<dyn Endpoint>) {
        self.endpoints.detach(endpoint).await;
    }

    pub async fn find_endpoint(&self, prefix: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.find(prefix).await
    }

    /// Resolve `remote_party` to an endpoint and ask it to create a
    /// connection on `call`.
    ///
    /// The protocol is the text before the first `:`; with none, the whole
    /// party is treated as the protocol, and an empty protocol falls back
    /// to the first registered endpoint. Every endpoint matching the
    /// prefix (case-insensitively) is tried in attach order until one
    /// accepts.
    pub async fn make_connection(
        &self,
        call: &Call,
        remote_party: &str,
        options: &ConnectionOptions,
    ) -> Result<()> {
        debug!("set up connection to \"{}\"", remote_party);

        if remote_party.is_empty() {
            return Err(EngineError::EmptyRemoteParty);
        }
        if self.endpoints.is_empty().await {
            return Err(EngineError::NoEndpoint {
                prefix: String::new(),
            });
        }

        let prefix = match remote_party.find(':') {
            Some(colon) => &remote_party[..colon],
            None => remote_party,
        };
        let prefix = if prefix.is_empty() {
            match self.endpoints.first_prefix().await {
                Some(p) => p,
                None => {
                    return Err(EngineError::NoEndpoint {
                        prefix: String::new(),
                    })
                }
            }
        } else {
            prefix.to_string()
        };

        let candidates = self.endpoints.matching(&prefix).await;
        if candidates.is_empty() {
            warn!("could not find endpoint to handle protocol \"{}\"", prefix);
            return Err(EngineError::NoEndpoint { prefix });
        }

        let mut last_err = None;
        for endpoint in candidates {
            match endpoint.make_connection(call, remote_party, options).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(EngineError::NoEndpoint { prefix }))
    }

    /// An endpoint reports a new inbound connection on `call`.
    ///
    /// After the handler gets its veto, the B-party is resolved (unless
    /// the call already has one) and its leg dispatched.
    /// `source_protocol` is the prefix of the endpoint the connection
    /// arrived on; it becomes the protocol part of route-table search
    /// keys.
    pub async fn on_incoming_connection(
        &self,
        token: &CallToken,
        source_protocol: &str,
        connection: &Arc<dyn Connection>,
    ) -> Result<()> {
        let call = self
            .registry
            .find_read_only(token)
            .await
            .ok_or_else(|| EngineError::CallNotFound {
                token: token.to_string(),
            })?;
        debug!("on incoming connection, call={}", token);

        if let Some(handler) = &self.handler {
            if !handler.on_incoming_connection(&call, connection).await {
                return Err(EngineError::ConnectionRefused);
            }
        }

        // Already have a B-party leg; nothing to route.
        if call.connection_count() > 1 {
            return Ok(());
        }

        let destination = self
            .route_connection(&call, source_protocol, connection)
            .await?;
        self.make_connection(&call, &destination, &ConnectionOptions::default())
            .await
    }

    /// Resolve the B-party address for an inbound connection.
    ///
    /// Prefers an explicit party B on the call, then the connection's
    /// destination address. An address naming a protocol we have an
    /// endpoint for passes through untouched, as does anything when the
    /// route table is empty (best effort).
    pub async fn route_connection(
        &self,
        call: &Call,
        source_protocol: &str,
        connection: &Arc<dyn Connection>,
    ) -> Result<String> {
        let mut address = call.party_b();
        if address.is_empty() {
            address = connection.destination_address();
            if address.is_empty() {
                return Err(EngineError::EmptyRemoteParty);
            }
        }

        if let Some(colon) = address.find(':') {
            if self.endpoints.find(&address[..colon]).await.is_some() {
                return Ok(address);
            }
        }

        if self.routes.is_empty() {
            return Ok(address);
        }

        self.routes
            .apply(source_protocol, &address)
            .ok_or_else(|| EngineError::NoRoute {
                search: format!("{source_protocol}:{address}"),
            })
    }

    // ---- route table -----------------------------------------------------

    pub fn add_route(&self, spec: &str) -> Result<bool> {
        self.routes.add_rule(spec)
    }

    /// Replace the route table. Returns whether any rule was accepted.
    pub fn set_route_table<S: AsRef<str>>(&self, specs: &[S]) -> bool {
        self.routes.set_rules(specs)
    }

    pub fn apply_route_table(&self, protocol: &str, address: &str) -> Option<String> {
        self.routes.apply(protocol, address)
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.routes
    }

    // ---- ports -----------------------------------------------------------

    pub fn set_tcp_ports(&self, base: u16, max: u16) {
        self.ports.set_tcp_ports(base, max);
    }

    pub fn next_tcp_port(&self) -> u16 {
        self.ports.next_tcp_port()
    }

    pub fn set_udp_ports(&self, base: u16, max: u16) {
        self.ports.set_udp_ports(base, max);
        self.nat
            .update_stun_port_ranges(self.ports.udp_range(), self.ports.rtp_range());
    }

    pub fn next_udp_port(&self) -> u16 {
        self.ports.next_udp_port()
    }

    pub fn set_rtp_ports(&self, base: u16, max: u16) {
        self.ports.set_rtp_ports(base, max);
        self.nat
            .update_stun_port_ranges(self.ports.udp_range(), self.ports.rtp_range());
    }

    /// First port of an adjacent RTP/RTCP pair.
    pub fn rtp_port_pair(&self) -> u16 {
        self.ports.rtp_port_pair()
    }

    pub fn tcp_ports(&self) -> (u16, u16) {
        self.ports.tcp_range()
    }

    pub fn udp_ports(&self) -> (u16, u16) {
        self.ports.udp_range()
    }

    pub fn rtp_ports(&self) -> (u16, u16) {
        self.ports.rtp_range()
    }

    // ---- NAT -------------------------------------------------------------

    /// Configure (or with an empty string, disable) the STUN server.
    pub async fn set_stun_server(&self, server: &str) -> NatType {
        self.nat
            .set_stun_server(server, self.ports.udp_range(), self.ports.rtp_range())
            .await
    }

    pub fn stun_server(&self) -> Option<String> {
        self.nat.stun().map(|c| c.server())
    }

    pub fn is_local_address(&self, ip: IpAddr) -> bool {
        self.nat.is_local_address(ip)
    }

    pub fn translate_address(&self, local: IpAddr, remote: IpAddr) -> Option<IpAddr> {
        self.nat.translate_address(local, remote)
    }

    pub fn is_rtp_nat_enabled(
        &self,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        sig_addr: IpAddr,
        incoming: bool,
    ) -> bool {
        self.nat
            .is_rtp_nat_enabled(local_addr, peer_addr, sig_addr, incoming)
    }

    pub fn nat_coordinator(&self) -> &Arc<NatCoordinator> {
        &self.nat
    }

    /// Sender for local interface up/down notifications. `None` once the
    /// engine is shut down.
    pub fn interface_events(&self) -> Option<mpsc::UnboundedSender<InterfaceEvent>> {
        self.iface_tx.lock().clone()
    }

    // ---- media knobs -----------------------------------------------------

    /// Set the no-media watchdog interval. Rejects anything under 10 ms.
    pub fn set_no_media_timeout(&self, timeout: Duration) -> bool {
        if timeout < Duration::from_millis(10) {
            return false;
        }
        *self.no_media_timeout.lock() = timeout;
        true
    }

    pub fn no_media_timeout(&self) -> Duration {
        *self.no_media_timeout.lock()
    }

    /// Set the audio jitter buffer bounds; the minimum is floored at 10 ms
    /// and the maximum never drops below the minimum.
    pub fn set_audio_jitter_delay(&self, min: Duration, max: Duration) {
        let min = min.max(Duration::from_millis(10));
        let max = max.max(min);
        *self.audio_jitter.lock() = (min, max);
    }

    pub fn audio_jitter_delay(&self) -> (Duration, Duration) {
        *self.audio_jitter.lock()
    }

    // ---- lifecycle -------------------------------------------------------

    /// Cooperative shutdown: clear all calls and wait for the drain, drop
    /// the endpoints, stop the collector (bounded) with a final sweep, and
    /// stop the interface monitor. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down call engine");

        self.clear_all_calls(self.config.shutdown_reason, true).await;
        self.endpoints.detach_all().await;
        self.collector.shutdown(self.config.shutdown_grace).await;

        // Closing the channel ends the monitor task.
        drop(self.iface_tx.lock().take());
        let iface_task = self.iface_task.lock().take();
        if let Some(task) = iface_task {
            let _ = tokio::time::timeout(self.config.shutdown_grace, task).await;
        }

        debug!("call engine shut down");
    }
}
