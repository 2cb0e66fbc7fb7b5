// Packet correlator: attributes captured packets to displayed connections

use super::{SharedDisplay, lock_or_recover};
use crate::connection::PacketObserved;
use std::sync::atomic::{AtomicU64, Ordering};

/// Updates per-connection traffic counters, one packet at a time
pub struct PacketCorrelator {
    display: SharedDisplay,
    packets_seen: AtomicU64,
    packets_matched: AtomicU64,
}

impl PacketCorrelator {
    pub fn new(display: SharedDisplay) -> Self {
        Self {
            display,
            packets_seen: AtomicU64::new(0),
            packets_matched: AtomicU64::new(0),
        }
    }

    /// Credit the packet to every displayed entry keyed by either side.
    ///
    /// Returns whether anything matched. Unmatched packets bump the shared
    /// dropped counter.
    pub fn on_packet(&self, packet: &PacketObserved) -> bool {
        let matched = {
            let mut state = lock_or_recover(&self.display);
            let mut matched = false;

            for c in state.connections.iter_mut() {
                if c.key == packet.key1 {
                    c.packets_sent = c.packets_sent.saturating_add(1);
                    c.bytes_sent = c.bytes_sent.saturating_add(packet.bytes);
                    c.has_data = true;
                    matched = true;
                }
                if c.key == packet.key2 {
                    c.packets_received = c.packets_received.saturating_add(1);
                    c.bytes_received = c.bytes_received.saturating_add(packet.bytes);
                    c.has_data = true;
                    matched = true;
                }
            }

            if !matched {
                state.dropped_packets = state.dropped_packets.saturating_add(1);
            }
            matched
        };

        let seen = self.packets_seen.fetch_add(1, Ordering::Relaxed) + 1;
        let matched_total = if matched {
            self.packets_matched.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.packets_matched.load(Ordering::Relaxed)
        };

        if seen % 1000 == 0 {
            log::debug!(
                "Packet stats: seen={}, matched={}, dropped={} (match rate: {:.1}%)",
                seen,
                matched_total,
                seen - matched_total,
                (matched_total as f64 / seen as f64) * 100.0
            );
        }

        matched
    }

    pub fn packets_seen(&self) -> u64 {
        self.packets_seen.load(Ordering::Relaxed)
    }
}
