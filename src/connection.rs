// Connection data model shared by the backends, the engine and the UI

use std::fmt;
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Protocol plus address family, as shown in the type column
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ConnectionType {
    Tcp,
    Tcp6,
    Udp,
    Udp6,
}

impl ConnectionType {
    pub fn new(protocol: Protocol, addr: &IpAddr) -> Self {
        match (protocol, addr) {
            (Protocol::Tcp, IpAddr::V4(_)) => ConnectionType::Tcp,
            (Protocol::Tcp, IpAddr::V6(_)) => ConnectionType::Tcp6,
            (Protocol::Udp, IpAddr::V4(_)) => ConnectionType::Udp,
            (Protocol::Udp, IpAddr::V6(_)) => ConnectionType::Udp6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Tcp => "TCP",
            ConnectionType::Tcp6 => "TCPv6",
            ConnectionType::Udp => "UDP",
            ConnectionType::Udp6 => "UDPv6",
        }
    }

    pub fn is_tcp(&self) -> bool {
        self.as_str().starts_with("TCP")
    }

    pub fn is_udp(&self) -> bool {
        self.as_str().starts_with("UDP")
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Socket state as reported by the OS
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ConnectionState {
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
    Closed,
    Unknown,
}

impl ConnectionState {
    /// Map the `Debug` names procfs uses for `TcpState`/`UdpState`
    pub fn from_procfs_name(name: &str) -> Self {
        match name {
            "Listen" => ConnectionState::Listen,
            "SynSent" => ConnectionState::SynSent,
            "SynRecv" | "NewSynRecv" => ConnectionState::SynReceived,
            "Established" => ConnectionState::Established,
            "FinWait1" => ConnectionState::FinWait1,
            "FinWait2" => ConnectionState::FinWait2,
            "CloseWait" => ConnectionState::CloseWait,
            "Closing" => ConnectionState::Closing,
            "LastAck" => ConnectionState::LastAck,
            "TimeWait" => ConnectionState::TimeWait,
            "Close" => ConnectionState::Closed,
            _ => ConnectionState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Listen => "LISTEN",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynReceived => "SYN_RECEIVED",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinWait1 => "FIN_WAIT_1",
            ConnectionState::FinWait2 => "FIN_WAIT_2",
            ConnectionState::CloseWait => "CLOSE_WAIT",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::LastAck => "LAST_ACK",
            ConnectionState::TimeWait => "TIME_WAIT",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a connection, stable across polls and packet events
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnectionKey {
    pub protocol: Protocol,
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl ConnectionKey {
    pub fn new(protocol: Protocol, local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            protocol,
            local,
            remote,
        }
    }

    /// The same connection seen from the other endpoint
    pub fn reversed(&self) -> Self {
        Self {
            protocol: self.protocol,
            local: self.remote,
            remote: self.local,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        write!(f, "{} {} -> {}", proto, self.local, self.remote)
    }
}

/// One OS connection as last observed by the refresh cycle
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConnection {
    pub key: ConnectionKey,
    pub pid: u32, // 0 = owner unknown
    pub process_name: String,
    pub connection_type: ConnectionType,
    pub state: ConnectionState,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub local_hostname: String,  // empty until resolved
    pub remote_hostname: String, // empty until resolved
}

impl LiveConnection {
    pub fn new(
        protocol: Protocol,
        local: SocketAddr,
        remote: SocketAddr,
        state: ConnectionState,
        pid: u32,
        process_name: String,
    ) -> Self {
        Self {
            key: ConnectionKey::new(protocol, local, remote),
            pid,
            process_name,
            connection_type: ConnectionType::new(protocol, &local.ip()),
            state,
            local,
            remote,
            local_hostname: String::new(),
            remote_hostname: String::new(),
        }
    }

    /// Copy a fresh snapshot row onto this entry in place.
    ///
    /// Snapshot rows never carry hostnames, so names resolved earlier are kept
    /// unless the row brings its own.
    pub fn copy_from(&mut self, row: &LiveConnection) {
        self.pid = row.pid;
        self.process_name.clone_from(&row.process_name);
        self.connection_type = row.connection_type;
        self.state = row.state;
        self.local = row.local;
        self.remote = row.remote;
        if !row.local_hostname.is_empty() {
            self.local_hostname.clone_from(&row.local_hostname);
        }
        if !row.remote_hostname.is_empty() {
            self.remote_hostname.clone_from(&row.remote_hostname);
        }
    }
}

/// Presentation projection of a live connection plus its UI lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedConnection {
    pub key: ConnectionKey,
    pub pid: u32,
    pub process_name: String,
    pub connection_type: ConnectionType,
    pub state: ConnectionState,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub local_hostname: String,
    pub remote_hostname: String,

    // Lifecycle flags
    pub is_new: bool,
    pub has_changed: bool,
    pub is_closed: bool,
    pub is_visible: bool,

    // Traffic counters, written by the packet correlator
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub has_data: bool,
}

impl DisplayedConnection {
    pub fn from_live(live: &LiveConnection) -> Self {
        Self {
            key: live.key,
            pid: live.pid,
            process_name: live.process_name.clone(),
            connection_type: live.connection_type,
            state: live.state,
            local: live.local,
            remote: live.remote,
            local_hostname: live.local_hostname.clone(),
            remote_hostname: live.remote_hostname.clone(),
            is_new: false,
            has_changed: false,
            is_closed: false,
            is_visible: true,
            packets_sent: 0,
            bytes_sent: 0,
            packets_received: 0,
            bytes_received: 0,
            has_data: false,
        }
    }

    /// Copy the core fields from the live entry, leaving flags and counters alone
    pub fn copy_from_live(&mut self, live: &LiveConnection) {
        self.pid = live.pid;
        self.process_name.clone_from(&live.process_name);
        self.connection_type = live.connection_type;
        self.state = live.state;
        self.local = live.local;
        self.remote = live.remote;
        self.local_hostname.clone_from(&live.local_hostname);
        self.remote_hostname.clone_from(&live.remote_hostname);
    }
}

/// Rendered text the connection filter is evaluated against
impl fmt::Display for DisplayedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            self.connection_type,
            self.local,
            self.local_hostname,
            self.remote,
            self.remote_hostname,
            self.state,
            self.pid,
            self.process_name
        )
    }
}

/// A packet seen on the wire, keyed in both orientations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketObserved {
    /// source -> destination, matches the sending connection
    pub key1: ConnectionKey,
    /// destination -> source, matches the receiving connection
    pub key2: ConnectionKey,
    pub bytes: u64,
}

impl PacketObserved {
    pub fn from_endpoints(
        protocol: Protocol,
        source: SocketAddr,
        destination: SocketAddr,
        bytes: u64,
    ) -> Self {
        let key1 = ConnectionKey::new(protocol, source, destination);
        Self {
            key1,
            key2: key1.reversed(),
            bytes,
        }
    }
}

/// Turn an IPv4-mapped IPv6 endpoint (`[::ffff:a.b.c.d]:port`) into plain
/// IPv4. Dual-stack sockets report IPv4 peers this way while the wire carries
/// IPv4 headers.
pub fn unmap_ipv4(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_connection_type_from_family() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "::1".parse().unwrap();

        assert_eq!(ConnectionType::new(Protocol::Tcp, &v4), ConnectionType::Tcp);
        assert_eq!(ConnectionType::new(Protocol::Tcp, &v6), ConnectionType::Tcp6);
        assert_eq!(ConnectionType::new(Protocol::Udp, &v6), ConnectionType::Udp6);
        assert!(ConnectionType::Tcp6.is_tcp());
        assert!(ConnectionType::Udp6.is_udp());
        assert!(!ConnectionType::Udp.is_tcp());
    }

    #[test]
    fn test_state_from_procfs_names() {
        assert_eq!(
            ConnectionState::from_procfs_name("Established"),
            ConnectionState::Established
        );
        assert_eq!(
            ConnectionState::from_procfs_name("Listen"),
            ConnectionState::Listen
        );
        assert_eq!(
            ConnectionState::from_procfs_name("Close"),
            ConnectionState::Closed
        );
        assert_eq!(
            ConnectionState::from_procfs_name("bogus"),
            ConnectionState::Unknown
        );
    }

    #[test]
    fn test_packet_keys_are_mirrored() {
        let packet = PacketObserved::from_endpoints(
            Protocol::Tcp,
            addr("10.0.0.1:5000"),
            addr("93.184.216.34:443"),
            60,
        );

        assert_eq!(packet.key1.local, addr("10.0.0.1:5000"));
        assert_eq!(packet.key2.local, addr("93.184.216.34:443"));
        assert_eq!(packet.key2.reversed(), packet.key1);
    }

    #[test]
    fn test_copy_from_keeps_resolved_hostnames() {
        let mut live = LiveConnection::new(
            Protocol::Tcp,
            addr("10.0.0.1:5000"),
            addr("93.184.216.34:443"),
            ConnectionState::SynSent,
            0,
            String::new(),
        );
        live.remote_hostname = "example.com".to_string();

        let row = LiveConnection::new(
            Protocol::Tcp,
            addr("10.0.0.1:5000"),
            addr("93.184.216.34:443"),
            ConnectionState::Established,
            42,
            "curl".to_string(),
        );
        live.copy_from(&row);

        assert_eq!(live.pid, 42);
        assert_eq!(live.state, ConnectionState::Established);
        assert_eq!(live.remote_hostname, "example.com");
    }

    #[test]
    fn test_rendered_text_contains_state_and_process() {
        let live = LiveConnection::new(
            Protocol::Udp,
            addr("0.0.0.0:53"),
            addr("0.0.0.0:0"),
            ConnectionState::Closed,
            7,
            "dnsmasq".to_string(),
        );
        let text = DisplayedConnection::from_live(&live).to_string();

        assert!(text.starts_with("UDP 0.0.0.0:53"));
        assert!(text.contains("CLOSED"));
        assert!(text.ends_with("7 dnsmasq"));
    }

    #[test]
    fn test_unmap_ipv4() {
        assert_eq!(
            unmap_ipv4(addr("[::ffff:10.0.0.1]:22")),
            addr("10.0.0.1:22")
        );
        assert_eq!(unmap_ipv4(addr("[::1]:22")), addr("[::1]:22"));
        assert_eq!(unmap_ipv4(addr("[2001:db8::1]:80")), addr("[2001:db8::1]:80"));
        assert_eq!(unmap_ipv4(addr("10.0.0.1:22")), addr("10.0.0.1:22"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
