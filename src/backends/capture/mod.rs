// Packet capture backends
//
// A packet source delivers `PacketObserved` events to one registered callback,
// from its own threads, until it is unregistered.

use super::{BackendCapabilities, BackendPriority};
use crate::connection::PacketObserved;
use anyhow::Result;
use std::sync::Arc;

#[cfg(feature = "capture-pnet")]
pub mod pnet;

pub type PacketCallback = Arc<dyn Fn(PacketObserved) + Send + Sync>;

/// Asynchronous packet event source
pub trait PacketSource: Send + Sync {
    /// Backend name (e.g., "pnet")
    fn name(&self) -> &'static str;

    fn priority(&self) -> BackendPriority;

    fn is_available() -> bool
    where
        Self: Sized;

    fn capabilities(&self) -> BackendCapabilities;

    /// Start delivering packets to `callback`. Registering again replaces the
    /// callback without starting a second capture.
    fn register(&self, callback: PacketCallback) -> Result<()>;

    /// Stop delivering packets. Once this returns the callback is never
    /// invoked again. Calling it when nothing is registered is a no-op.
    fn unregister(&self);
}

/// Packet source metadata for selection
#[derive(Debug, Clone)]
pub struct PacketSourceInfo {
    pub name: &'static str,
    pub priority: BackendPriority,
    pub available: bool,
}

pub fn detect_packet_sources() -> Vec<PacketSourceInfo> {
    let mut sources = Vec::new();

    #[cfg(feature = "capture-pnet")]
    {
        sources.push(PacketSourceInfo {
            name: "pnet",
            priority: BackendPriority::Good,
            available: self::pnet::PnetPacketSource::is_available(),
        });
    }

    sources
}

/// Pick the best packet source, or None when capture is not compiled in.
/// Construction does not start capturing; that happens on `register`.
pub fn select_packet_source(interfaces: Option<Vec<String>>) -> Option<Box<dyn PacketSource>> {
    detect_packet_sources()
        .into_iter()
        .filter(|info| info.available)
        .filter_map(|info| create_packet_source(info.name, interfaces.clone()))
        .max_by_key(|source| source.priority())
}

fn create_packet_source(
    name: &str,
    interfaces: Option<Vec<String>>,
) -> Option<Box<dyn PacketSource>> {
    match name {
        #[cfg(feature = "capture-pnet")]
        "pnet" => Some(Box::new(self::pnet::PnetPacketSource::new(interfaces))),

        other => {
            log::warn!("Packet source {} is not constructible", other);
            let _ = interfaces;
            None
        }
    }
}
