//! Shared port-range allocation for TCP, UDP and RTP transports.

use parking_lot::Mutex;

/// Default RTP port range.
pub const DEFAULT_RTP_PORT_BASE: u16 = 5000;
pub const DEFAULT_RTP_PORT_MAX: u16 = 5999;

#[derive(Debug, Clone, Copy)]
struct Cursor {
    base: u16,
    current: u16,
    max: u16,
}

/// A wrapping port-range allocator.
///
/// A base of 0 disables pooling: [`PortRange::next`] then returns 0 and
/// the caller must let the OS pick a port.
pub struct PortRange {
    info: Mutex<Cursor>,
}

impl PortRange {
    /// A disabled (fully dynamic) range.
    pub fn new() -> Self {
        Self::with_range(0, 0)
    }

    pub fn with_range(base: u16, max: u16) -> Self {
        Self {
            info: Mutex::new(Cursor {
                base,
                current: base,
                max,
            }),
        }
    }

    /// Configure the range.
    ///
    /// A `base` of 0 collapses base and max to `dflt` (plus `range` when a
    /// default exists); otherwise `base` is clamped to `[1024, 65500]`,
    /// a `max` at or below it becomes `base + range`, and `max` is capped
    /// at 65535.
    pub fn set(&self, base: u16, max: u16, range: u16, dflt: u16) {
        let (new_base, new_max) = if base == 0 {
            let b = dflt as u32;
            let m = if dflt > 0 { b + range as u32 } else { 0 };
            (b, m)
        } else {
            let b = base.clamp(1024, 65500) as u32;
            let mut m = max as u32;
            if m <= b {
                m = b + range as u32;
            }
            (b, m.min(65535))
        };

        let mut info = self.info.lock();
        info.base = new_base as u16;
        info.current = info.base;
        info.max = new_max as u16;
    }

    /// Take the next port, advancing the cursor by `increment` and
    /// wrapping to base when the cursor would leave the range. Returns 0
    /// when pooling is disabled.
    pub fn next(&self, increment: u16) -> u16 {
        let mut info = self.info.lock();

        if (info.current as i64) < info.base as i64
            || info.current as i64 >= info.max as i64 - increment as i64
        {
            info.current = info.base;
        }

        if info.current == 0 {
            return 0;
        }

        let port = info.current;
        info.current = port.saturating_add(increment);
        port
    }

    pub fn base(&self) -> u16 {
        self.info.lock().base
    }

    pub fn max(&self) -> u16 {
        self.info.lock().max
    }

    /// (base, max) as a pair.
    pub fn range(&self) -> (u16, u16) {
        let info = self.info.lock();
        (info.base, info.max)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new()
    }
}

/// The engine's three transport port ranges.
///
/// TCP and UDP default to fully dynamic allocation; RTP defaults to
/// 5000-5999. The RTP base is forced even so that pair allocation lands
/// RTP/RTCP on adjacent ports.
pub struct PortManager {
    tcp: PortRange,
    udp: PortRange,
    rtp: PortRange,
}

impl PortManager {
    pub fn new() -> Self {
        Self {
            tcp: PortRange::new(),
            udp: PortRange::new(),
            rtp: PortRange::with_range(DEFAULT_RTP_PORT_BASE, DEFAULT_RTP_PORT_MAX),
        }
    }

    pub fn set_tcp_ports(&self, base: u16, max: u16) {
        self.tcp.set(base, max, 49, 0);
    }

    pub fn next_tcp_port(&self) -> u16 {
        self.tcp.next(1)
    }

    pub fn set_udp_ports(&self, base: u16, max: u16) {
        self.udp.set(base, max, 99, 0);
    }

    pub fn next_udp_port(&self) -> u16 {
        self.udp.next(1)
    }

    pub fn set_rtp_ports(&self, base: u16, max: u16) {
        self.rtp
            .set(base.wrapping_add(1) & 0xfffe, max & 0xfffe, 199, DEFAULT_RTP_PORT_BASE);
    }

    /// First port of an adjacent RTP/RTCP pair.
    pub fn rtp_port_pair(&self) -> u16 {
        self.rtp.next(2)
    }

    pub fn tcp_range(&self) -> (u16, u16) {
        self.tcp.range()
    }

    pub fn udp_range(&self) -> (u16, u16) {
        self.udp.range()
    }

    pub fn rtp_range(&self) -> (u16, u16) {
        self.rtp.range()
    }
}

impl Default for PortManager {
    fn default() -> Self {
        Self::new()
    }
}
