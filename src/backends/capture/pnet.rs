// pnet-based packet capture backend

use super::{PacketCallback, PacketSource};
use crate::backends::{BackendCapabilities, BackendPriority};
use crate::connection::{PacketObserved, Protocol};
use anyhow::{Context, Result};
use pnet::datalink::{self, Channel, NetworkInterface};
use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

/// How long a capture thread blocks before re-checking its stop flag
const READ_TIMEOUT: Duration = Duration::from_millis(100);

type CallbackSlot = Arc<RwLock<Option<PacketCallback>>>;

/// Raw datalink capture, one thread per interface
pub struct PnetPacketSource {
    // None = every interface that is up and has an address
    interfaces: Option<Vec<String>>,
    callback: CallbackSlot,
    // Stop flag of the currently running capture threads
    running: Mutex<Option<Arc<AtomicBool>>>,
}

impl PnetPacketSource {
    pub fn new(interfaces: Option<Vec<String>>) -> Self {
        Self {
            interfaces,
            callback: Arc::new(RwLock::new(None)),
            running: Mutex::new(None),
        }
    }

    fn find_interfaces(&self) -> Vec<NetworkInterface> {
        datalink::interfaces()
            .into_iter()
            .filter(|iface| match &self.interfaces {
                Some(names) => names.iter().any(|n| n == &iface.name),
                None => iface.is_up() && !iface.ips.is_empty(),
            })
            .collect()
    }

    fn capture_on_interface(
        interface: NetworkInterface,
        callback: CallbackSlot,
        stop: Arc<AtomicBool>,
    ) -> Result<()> {
        let iface_name = interface.name.clone();
        let config = datalink::Config {
            read_timeout: Some(READ_TIMEOUT),
            ..Default::default()
        };

        let mut rx = match datalink::channel(&interface, config)
            .with_context(|| format!("Failed to create channel for {}", iface_name))?
        {
            Channel::Ethernet(_, rx) => rx,
            _ => anyhow::bail!("Unsupported channel type for {}", iface_name),
        };

        log::info!("Packet capture started on interface: {}", iface_name);

        while !stop.load(Ordering::Acquire) {
            match rx.next() {
                Ok(frame) => {
                    let Some(packet) = parse_frame(frame) else {
                        continue;
                    };
                    let slot = callback.read().unwrap_or_else(PoisonError::into_inner);
                    // Re-check under the slot lock so unregister() is final
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    if let Some(cb) = slot.as_ref() {
                        cb(packet);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
                Err(e) => {
                    log::error!("Packet receive error on {}: {}", iface_name, e);
                    thread::sleep(READ_TIMEOUT);
                }
            }
        }

        log::info!("Packet capture stopped on interface: {}", iface_name);
        Ok(())
    }
}

/// Parse an Ethernet frame down to its TCP/UDP endpoints
fn parse_frame(frame: &[u8]) -> Option<PacketObserved> {
    let ethernet = EthernetPacket::new(frame)?;
    let bytes = frame.len() as u64;

    match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => {
            let ipv4 = Ipv4Packet::new(ethernet.payload())?;
            parse_transport(
                IpAddr::V4(ipv4.get_source()),
                IpAddr::V4(ipv4.get_destination()),
                ipv4.get_next_level_protocol(),
                ipv4.payload(),
                bytes,
            )
        }
        EtherTypes::Ipv6 => {
            let ipv6 = Ipv6Packet::new(ethernet.payload())?;
            parse_transport(
                IpAddr::V6(ipv6.get_source()),
                IpAddr::V6(ipv6.get_destination()),
                ipv6.get_next_header(),
                ipv6.payload(),
                bytes,
            )
        }
        _ => None,
    }
}

fn parse_transport(
    src: IpAddr,
    dst: IpAddr,
    next: IpNextHeaderProtocol,
    payload: &[u8],
    bytes: u64,
) -> Option<PacketObserved> {
    let (protocol, src_port, dst_port) = match next {
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(payload)?;
            (Protocol::Tcp, tcp.get_source(), tcp.get_destination())
        }
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(payload)?;
            (Protocol::Udp, udp.get_source(), udp.get_destination())
        }
        _ => return None,
    };

    Some(PacketObserved::from_endpoints(
        protocol,
        SocketAddr::new(src, src_port),
        SocketAddr::new(dst, dst_port),
        bytes,
    ))
}

impl PacketSource for PnetPacketSource {
    fn name(&self) -> &'static str {
        "pnet"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available() -> bool {
        // pnet works on Linux and BSD with raw sockets, and Windows with Npcap
        cfg!(target_os = "linux")
            || cfg!(target_os = "freebsd")
            || cfg!(target_os = "openbsd")
            || cfg!(target_os = "netbsd")
            || cfg!(target_os = "windows")
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            ipv4_support: true,
            ipv6_support: true,
            per_process: false,
            per_connection: true,
        }
    }

    fn register(&self, callback: PacketCallback) -> Result<()> {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Ok(());
        }

        let interfaces = self.find_interfaces();
        if interfaces.is_empty() {
            anyhow::bail!("No capturable network interfaces found");
        }
        log::info!("Starting packet capture on {} interfaces", interfaces.len());

        let stop = Arc::new(AtomicBool::new(false));
        for interface in interfaces {
            let callback = Arc::clone(&self.callback);
            let stop = Arc::clone(&stop);
            let iface_name = interface.name.clone();

            thread::Builder::new()
                .name(format!("capture-{}", iface_name))
                .spawn(move || {
                    if let Err(e) = Self::capture_on_interface(interface, callback, stop) {
                        log::error!("Packet capture error on {}: {:#}", iface_name, e);
                    }
                })
                .context("Failed to spawn capture thread")?;
        }

        *running = Some(stop);
        Ok(())
    }

    fn unregister(&self) {
        if let Some(stop) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            stop.store(true, Ordering::Release);
        }
        // Waits for any callback that is mid-flight
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
