//! Shared mock collaborators for the integration tests.

#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tandem_call_core::{
    Call, CallEndReason, CallToken, Connection, ConnectionOptions, Endpoint, EngineError,
    EngineEventHandler, NatType, StunProbe,
};

/// A connection leg that records what it was asked to reach.
pub struct MockConnection {
    destination: String,
    end_reason: Mutex<Option<CallEndReason>>,
    setup_fails: bool,
    bypass: bool,
}

impl MockConnection {
    pub fn new(destination: &str) -> Arc<Self> {
        Arc::new(Self {
            destination: destination.to_string(),
            end_reason: Mutex::new(None),
            setup_fails: false,
            bypass: true,
        })
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn call_end_reason(&self) -> Option<CallEndReason> {
        *self.end_reason.lock().unwrap()
    }

    fn destination_address(&self) -> String {
        self.destination.clone()
    }

    fn is_media_bypass_possible(&self, _session_id: u32) -> bool {
        self.bypass
    }

    async fn set_up_connection(&self) -> bool {
        if self.setup_fails {
            *self.end_reason.lock().unwrap() = Some(CallEndReason::EndedByConnectFail);
            false
        } else {
            true
        }
    }
}

/// A protocol endpoint that attaches [`MockConnection`] legs.
pub struct MockEndpoint {
    prefix: String,
    /// When set, `make_connection` refuses outright.
    pub reject: AtomicBool,
    /// When set, attached connections fail their setup.
    pub setup_fails: AtomicBool,
    /// When cleared, `garbage_collection` reports not-drained.
    pub drained: AtomicBool,
    pub gc_calls: AtomicUsize,
    /// Remote parties received, in order.
    pub requests: Mutex<Vec<String>>,
    /// Connections attached, in order.
    pub connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockEndpoint {
    pub fn new(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.to_string(),
            reject: AtomicBool::new(false),
            setup_fails: AtomicBool::new(false),
            drained: AtomicBool::new(true),
            gc_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_connection(&self) -> Option<Arc<MockConnection>> {
        self.connections.lock().unwrap().last().cloned()
    }

    fn strip_prefix<'a>(&self, remote_party: &'a str) -> &'a str {
        match remote_party.split_once(':') {
            Some((proto, rest)) if proto.eq_ignore_ascii_case(&self.prefix) => rest,
            _ => remote_party,
        }
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    fn prefix_name(&self) -> &str {
        &self.prefix
    }

    async fn make_connection(
        &self,
        call: &Call,
        remote_party: &str,
        _options: &ConnectionOptions,
    ) -> tandem_call_core::Result<()> {
        self.requests.lock().unwrap().push(remote_party.to_string());

        if self.reject.load(Ordering::SeqCst) {
            return Err(EngineError::ConnectionFailed {
                reason: CallEndReason::EndedByNoUser,
            });
        }

        let connection = Arc::new(MockConnection {
            destination: self.strip_prefix(remote_party).to_string(),
            end_reason: Mutex::new(None),
            setup_fails: self.setup_fails.load(Ordering::SeqCst),
            bypass: true,
        });
        self.connections.lock().unwrap().push(connection.clone());
        call.attach_connection(connection);
        Ok(())
    }

    async fn garbage_collection(&self) -> bool {
        self.gc_calls.fetch_add(1, Ordering::SeqCst);
        self.drained.load(Ordering::SeqCst)
    }
}

/// Event handler recording every hook invocation.
#[derive(Default)]
pub struct TrackingHandler {
    pub events: Mutex<Vec<String>>,
    pub veto_incoming: AtomicBool,
}

impl TrackingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineEventHandler for TrackingHandler {
    async fn on_incoming_connection(
        &self,
        call: &Call,
        _connection: &Arc<dyn Connection>,
    ) -> bool {
        self.events
            .lock()
            .unwrap()
            .push(format!("incoming:{}", call.token()));
        !self.veto_incoming.load(Ordering::SeqCst)
    }

    async fn on_call_established(&self, token: &CallToken) {
        self.events
            .lock()
            .unwrap()
            .push(format!("established:{token}"));
    }

    async fn on_call_cleared(&self, token: &CallToken, reason: CallEndReason) {
        self.events
            .lock()
            .unwrap()
            .push(format!("cleared:{token}:{reason}"));
    }
}

/// A STUN probe with canned answers.
pub struct MockStunProbe {
    pub nat_type: NatType,
    pub external: Option<IpAddr>,
    pub external_calls: AtomicUsize,
}

impl MockStunProbe {
    pub fn new(nat_type: NatType, external: Option<IpAddr>) -> Arc<Self> {
        Arc::new(Self {
            nat_type,
            external,
            external_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl StunProbe for MockStunProbe {
    async fn nat_type(&self, _server: &str) -> NatType {
        self.nat_type
    }

    async fn external_address(&self, _server: &str) -> Option<IpAddr> {
        self.external_calls.fetch_add(1, Ordering::SeqCst);
        self.external
    }
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}
