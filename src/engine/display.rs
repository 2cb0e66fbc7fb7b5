// Display cycle: reconciles the live set into the displayed set

use super::filter::{self, FilterSettings};
use super::ordering::{ordered_merge, sort_connections};
use super::{LiveSet, SharedDisplay, SharedSettings, lock_or_recover};
use crate::connection::{ConnectionKey, DisplayedConnection, LiveConnection};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayStats {
    pub added: usize,
    pub updated: usize,
    pub closed: usize,
    pub removed: usize,
}

/// Whether a live entry carries news for its displayed counterpart.
///
/// None means the pair only shares a key: both pids are known and differ, so
/// it is a different process reusing the address.
fn needs_update(live: &LiveConnection, shown: &DisplayedConnection) -> Option<bool> {
    if live.pid != 0 && shown.pid != 0 && live.pid != shown.pid {
        return None;
    }

    Some(
        (live.pid != 0 && shown.pid == 0)
            || live.process_name != shown.process_name
            || live.state != shown.state
            || live.local_hostname != shown.local_hostname
            || live.remote_hostname != shown.remote_hostname,
    )
}

/// One full reconciliation pass over the displayed set.
///
/// The caller must hold the display lock for the whole call.
pub fn reconcile(
    displayed: &mut Vec<DisplayedConnection>,
    live: &[LiveConnection],
    filter_settings: &FilterSettings,
) -> DisplayStats {
    let mut stats = DisplayStats::default();

    for c in displayed.iter_mut() {
        c.is_new = false;
        c.has_changed = false;
        c.has_data = false;
    }

    // Entries closed last cycle have had their one cycle on screen
    let before = displayed.len();
    displayed.retain(|c| !c.is_closed);
    stats.removed = before - displayed.len();

    let index: HashMap<ConnectionKey, usize> = displayed
        .iter()
        .enumerate()
        .map(|(i, c)| (c.key, i))
        .collect();

    let mut additions = Vec::new();
    let mut pending: HashSet<ConnectionKey> = HashSet::new();

    for l in live {
        match index.get(&l.key) {
            Some(&i) => {
                let shown = &mut displayed[i];
                if needs_update(l, shown) == Some(true) {
                    shown.has_changed = l.state != shown.state;
                    shown.copy_from_live(l);
                    stats.updated += 1;
                }
            }
            // Not shown until the owning process is known
            None if !l.process_name.is_empty() && pending.insert(l.key) => {
                let mut added = DisplayedConnection::from_live(l);
                added.is_new = true;
                additions.push(added);
            }
            None => {}
        }
    }

    stats.added = additions.len();
    sort_connections(&mut additions);
    ordered_merge(displayed, additions);

    let live_keys: HashSet<ConnectionKey> = live.iter().map(|l| l.key).collect();
    for c in displayed.iter_mut() {
        if !live_keys.contains(&c.key) {
            c.is_closed = true;
            stats.closed += 1;
        }
    }

    sort_connections(displayed);
    filter::apply(displayed, filter_settings);

    stats
}

pub struct DisplayCycle {
    live: LiveSet,
    display: SharedDisplay,
    settings: SharedSettings,
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl DisplayCycle {
    pub fn new(live: LiveSet, display: SharedDisplay, settings: SharedSettings) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::warn!("Memory metric unavailable: {}", e);
                None
            }
        };

        Self {
            live,
            display,
            settings,
            system: Mutex::new(System::new()),
            pid,
        }
    }

    /// Resident memory of this process in MiB
    fn sample_memory_mb(&self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };

        let mut system = lock_or_recover(&self.system);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        system
            .process(pid)
            .map(|p| p.memory() as f64 / 1024.0 / 1024.0)
            .unwrap_or(0.0)
    }

    pub fn run_once(&self) -> DisplayStats {
        // Copy before diffing; the refresh cycle keeps writing the live set
        let live = lock_or_recover(&self.live).clone();
        let filter_settings = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .filter
            .clone();
        let memory_mb = self.sample_memory_mb();

        let mut state = lock_or_recover(&self.display);
        let stats = reconcile(&mut state.connections, &live, &filter_settings);

        state.tcp_connections = state
            .connections
            .iter()
            .filter(|c| c.connection_type.is_tcp())
            .count();
        state.udp_connections = state
            .connections
            .iter()
            .filter(|c| c.connection_type.is_udp())
            .count();
        state.memory_mb = memory_mb;
        state.updated_at = Some(chrono::Local::now());

        if stats != DisplayStats::default() {
            log::debug!(
                "Display: {} added, {} updated, {} closed, {} removed ({} shown)",
                stats.added,
                stats.updated,
                stats.closed,
                stats.removed,
                state.connections.len()
            );
        }

        stats
    }
}
