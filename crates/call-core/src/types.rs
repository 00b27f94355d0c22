//! Core identifier and enumeration types shared across the engine.

use std::fmt;
use std::net::IpAddr;

/// Unique token identifying one live call.
///
/// Tokens are issued by the call registry from a per-process counter and are
/// never reused within a process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallToken(pub String);

impl CallToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallToken {
    fn from(s: &str) -> Self {
        CallToken(s.to_string())
    }
}

impl From<String> for CallToken {
    fn from(s: String) -> Self {
        CallToken(s)
    }
}

/// Why a call ended.
///
/// A call that has not ended yet carries no reason (`Option<CallEndReason>`
/// is `None`). The reason is set exactly once, by the first clear, and is
/// stable from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallEndReason {
    /// Local side cleared the call.
    EndedByLocalUser,
    /// Local side refused to accept the incoming connection.
    EndedByNoAccept,
    /// Answer was explicitly denied.
    EndedByAnswerDenied,
    /// Remote side cleared the call.
    EndedByRemoteUser,
    /// Remote side refused the call.
    EndedByRefusal,
    /// Remote side never answered.
    EndedByNoAnswer,
    /// Caller abandoned the call before answer.
    EndedByCallerAbort,
    /// Signaling transport failed mid-call.
    EndedByTransportFail,
    /// Transport could not connect to the remote party.
    EndedByConnectFail,
    /// No such local user.
    EndedByNoUser,
    /// Insufficient bandwidth.
    EndedByNoBandwidth,
    /// Call was forwarded elsewhere.
    EndedByCallForwarded,
    /// Local side is busy.
    EndedByLocalBusy,
    /// Remote side is busy.
    EndedByRemoteBusy,
    /// Remote host is unreachable.
    EndedByUnreachable,
    /// No endpoint is registered for the requested protocol.
    EndedByNoEndPoint,
    /// Remote host is offline.
    EndedByHostOffline,
    /// A temporary failure prevented the call.
    EndedByTemporaryFailure,
    /// Configured duration limit was hit.
    EndedByDurationLimit,
    /// Service is shutting down or out of service.
    EndedByOutOfService,
}

impl CallEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallEndReason::EndedByLocalUser => "EndedByLocalUser",
            CallEndReason::EndedByNoAccept => "EndedByNoAccept",
            CallEndReason::EndedByAnswerDenied => "EndedByAnswerDenied",
            CallEndReason::EndedByRemoteUser => "EndedByRemoteUser",
            CallEndReason::EndedByRefusal => "EndedByRefusal",
            CallEndReason::EndedByNoAnswer => "EndedByNoAnswer",
            CallEndReason::EndedByCallerAbort => "EndedByCallerAbort",
            CallEndReason::EndedByTransportFail => "EndedByTransportFail",
            CallEndReason::EndedByConnectFail => "EndedByConnectFail",
            CallEndReason::EndedByNoUser => "EndedByNoUser",
            CallEndReason::EndedByNoBandwidth => "EndedByNoBandwidth",
            CallEndReason::EndedByCallForwarded => "EndedByCallForwarded",
            CallEndReason::EndedByLocalBusy => "EndedByLocalBusy",
            CallEndReason::EndedByRemoteBusy => "EndedByRemoteBusy",
            CallEndReason::EndedByUnreachable => "EndedByUnreachable",
            CallEndReason::EndedByNoEndPoint => "EndedByNoEndPoint",
            CallEndReason::EndedByHostOffline => "EndedByHostOffline",
            CallEndReason::EndedByTemporaryFailure => "EndedByTemporaryFailure",
            CallEndReason::EndedByDurationLimit => "EndedByDurationLimit",
            CallEndReason::EndedByOutOfService => "EndedByOutOfService",
        }
    }
}

impl fmt::Display for CallEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NAT classification reported by a STUN probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NatType {
    /// Not yet determined, or STUN is disabled.
    Unknown,
    /// No NAT between us and the public internet.
    Open,
    /// Full cone NAT.
    Cone,
    /// Address-restricted cone NAT.
    Restricted,
    /// Port-restricted cone NAT.
    PortRestricted,
    /// Symmetric NAT.
    Symmetric,
    /// Symmetric firewall (no translation, but filtered).
    SymmetricFirewall,
    /// STUN traffic is blocked entirely.
    Blocked,
    /// Some STUN traffic passes, some is blocked.
    PartiallyBlocked,
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NatType::Unknown => "Unknown",
            NatType::Open => "Open",
            NatType::Cone => "Cone",
            NatType::Restricted => "Restricted",
            NatType::PortRestricted => "PortRestricted",
            NatType::Symmetric => "Symmetric",
            NatType::SymmetricFirewall => "SymmetricFirewall",
            NatType::Blocked => "Blocked",
            NatType::PartiallyBlocked => "PartiallyBlocked",
        };
        f.write_str(s)
    }
}

/// A local network interface came up or went away.
///
/// Fed to the engine's interface monitor, which keeps the known local
/// address set current and invalidates the STUN external-address cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceEvent {
    Added(IpAddr),
    Removed(IpAddr),
}
