// Refresh cycle: polls the connection source and diffs it into the live set

use super::{LiveSet, SharedSettings, lock_or_recover};
use crate::backends::resolver::HostnameResolver;
use crate::backends::snapshot::ConnectionSource;
use crate::connection::{ConnectionKey, LiveConnection};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub updated: usize,
    pub added: usize,
    pub removed: usize,
}

/// Diff one snapshot into the live set.
///
/// Rows with pid 0 are dropped unless `view_pid_zero`. Duplicate keys within
/// the snapshot keep their first row. Returns copies of the newly added
/// entries so the caller can enrich them.
pub fn apply_snapshot(
    live: &mut Vec<LiveConnection>,
    rows: Vec<LiveConnection>,
    view_pid_zero: bool,
) -> (Vec<LiveConnection>, RefreshStats) {
    let mut stats = RefreshStats::default();

    let mut incoming_keys: HashSet<ConnectionKey> = HashSet::with_capacity(rows.len());
    let incoming: Vec<LiveConnection> = rows
        .into_iter()
        .filter(|row| view_pid_zero || row.pid != 0)
        .filter(|row| incoming_keys.insert(row.key))
        .collect();

    let index: HashMap<ConnectionKey, usize> = live
        .iter()
        .enumerate()
        .map(|(i, c)| (c.key, i))
        .collect();

    // Update in place, collect additions
    let mut adds = Vec::new();
    for row in incoming {
        match index.get(&row.key) {
            Some(&i) => {
                live[i].copy_from(&row);
                stats.updated += 1;
            }
            None => adds.push(row),
        }
    }

    stats.added = adds.len();
    live.extend(adds.iter().cloned());

    let before = live.len();
    live.retain(|c| incoming_keys.contains(&c.key));
    stats.removed = before - live.len();

    (adds, stats)
}

pub struct RefreshCycle {
    source: Arc<dyn ConnectionSource>,
    resolver: Arc<dyn HostnameResolver>,
    live: LiveSet,
    settings: SharedSettings,
    shutdown: watch::Receiver<bool>,
}

impl RefreshCycle {
    pub fn new(
        source: Arc<dyn ConnectionSource>,
        resolver: Arc<dyn HostnameResolver>,
        live: LiveSet,
        settings: SharedSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            resolver,
            live,
            settings,
            shutdown,
        }
    }

    /// Fetch and apply one snapshot. Returns None when the source failed and
    /// the tick was skipped.
    pub async fn run_once(&self) -> Option<RefreshStats> {
        let source = Arc::clone(&self.source);
        let rows = match tokio::task::spawn_blocking(move || source.fetch_connections()).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                log::warn!("Connection snapshot unavailable: {:#}", e);
                return None;
            }
            Err(e) => {
                log::warn!("Connection snapshot task failed: {}", e);
                return None;
            }
        };

        let view_pid_zero = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .view_pid_zero;

        let (added, stats) = {
            let mut live = lock_or_recover(&self.live);
            apply_snapshot(&mut live, rows, view_pid_zero)
        };

        for conn in added {
            self.spawn_resolution(conn);
        }

        if stats.added > 0 || stats.removed > 0 {
            log::debug!(
                "Refresh: {} updated, {} added, {} removed",
                stats.updated,
                stats.added,
                stats.removed
            );
        }

        Some(stats)
    }

    /// Resolve hostnames for a new entry without waiting for the result
    fn spawn_resolution(&self, conn: LiveConnection) {
        let resolver = Arc::clone(&self.resolver);
        let live = Arc::clone(&self.live);
        let shutdown = self.shutdown.clone();

        tokio::task::spawn_blocking(move || {
            let names = resolver.resolve(conn.local.ip(), conn.remote.ip());
            if names.local.is_empty() && names.remote.is_empty() {
                return;
            }

            let mut live = lock_or_recover(&live);
            // Shutdown is flipped under this lock
            if *shutdown.borrow() {
                return;
            }
            // The entry may be gone by now; that is fine
            if let Some(entry) = live.iter_mut().find(|c| c.key == conn.key) {
                if !names.local.is_empty() {
                    entry.local_hostname = names.local;
                }
                if !names.remote.is_empty() {
                    entry.remote_hostname = names.remote;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::resolver::{NullResolver, ResolvedHostnames};
    use crate::backends::snapshot::testing::StaticConnectionSource;
    use crate::connection::{ConnectionState, Protocol};
    use crate::engine::RuntimeSettings;
    use std::net::IpAddr;
    use std::sync::{Mutex, RwLock};
    use std::time::Duration;

    fn row(local_port: u16, pid: u32, name: &str, state: ConnectionState) -> LiveConnection {
        LiveConnection::new(
            Protocol::Tcp,
            format!("10.0.0.1:{}", local_port).parse().unwrap(),
            "1.1.1.1:443".parse().unwrap(),
            state,
            pid,
            name.to_string(),
        )
    }

    fn ports(live: &[LiveConnection]) -> Vec<u16> {
        live.iter().map(|c| c.local.port()).collect()
    }

    #[test]
    fn test_update_add_remove() {
        let mut live = vec![
            row(1, 10, "a", ConnectionState::SynSent),
            row(2, 20, "b", ConnectionState::Established),
        ];

        let (added, stats) = apply_snapshot(
            &mut live,
            vec![
                row(1, 10, "a", ConnectionState::Established),
                row(3, 30, "c", ConnectionState::Established),
            ],
            false,
        );

        assert_eq!(
            stats,
            RefreshStats {
                updated: 1,
                added: 1,
                removed: 1
            }
        );
        assert_eq!(ports(&live), vec![1, 3]);
        assert_eq!(live[0].state, ConnectionState::Established);
        assert_eq!(ports(&added), vec![3]);
    }

    #[test]
    fn test_pid_zero_rows_are_dropped_unless_requested() {
        let rows = vec![
            row(1, 0, "", ConnectionState::TimeWait),
            row(2, 20, "b", ConnectionState::Established),
        ];

        let mut live = Vec::new();
        apply_snapshot(&mut live, rows.clone(), false);
        assert_eq!(ports(&live), vec![2]);

        let mut live = Vec::new();
        apply_snapshot(&mut live, rows, true);
        assert_eq!(ports(&live), vec![1, 2]);
    }

    #[test]
    fn test_keys_stay_unique() {
        let mut live = Vec::new();
        let rows = vec![
            row(1, 10, "first", ConnectionState::Established),
            row(1, 11, "dup", ConnectionState::Established),
            row(2, 20, "b", ConnectionState::Established),
        ];

        for _ in 0..3 {
            apply_snapshot(&mut live, rows.clone(), false);
        }

        let keys: HashSet<_> = live.iter().map(|c| c.key).collect();
        assert_eq!(keys.len(), live.len());
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].process_name, "first");
    }

    struct FixedResolver;

    impl HostnameResolver for FixedResolver {
        fn resolve(&self, _local: IpAddr, _remote: IpAddr) -> ResolvedHostnames {
            ResolvedHostnames {
                local: "me.local".to_string(),
                remote: "one.one.one.one".to_string(),
            }
        }
    }

    fn cycle(
        source: Arc<StaticConnectionSource>,
        resolver: Arc<dyn HostnameResolver>,
    ) -> (RefreshCycle, LiveSet, watch::Sender<bool>) {
        let live: LiveSet = Arc::new(Mutex::new(Vec::new()));
        let settings = Arc::new(RwLock::new(RuntimeSettings::default()));
        let (tx, rx) = watch::channel(false);
        (
            RefreshCycle::new(source, resolver, Arc::clone(&live), settings, rx),
            live,
            tx,
        )
    }

    #[tokio::test]
    async fn test_source_failure_skips_tick() {
        let source = Arc::new(StaticConnectionSource::new(vec![row(
            1,
            10,
            "a",
            ConnectionState::Established,
        )]));
        let (refresh, live, _tx) = cycle(Arc::clone(&source), Arc::new(NullResolver));

        assert!(refresh.run_once().await.is_some());
        assert_eq!(live.lock().unwrap().len(), 1);

        source.set(None);
        assert!(refresh.run_once().await.is_none());
        assert_eq!(live.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hostnames_are_written_back() {
        let source = Arc::new(StaticConnectionSource::new(vec![row(
            1,
            10,
            "a",
            ConnectionState::Established,
        )]));
        let (refresh, live, _tx) = cycle(source, Arc::new(FixedResolver));

        refresh.run_once().await;

        let mut resolved = false;
        for _ in 0..50 {
            if live.lock().unwrap()[0].remote_hostname == "one.one.one.one" {
                resolved = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(resolved);

        // A later snapshot without names keeps them
        refresh.run_once().await;
        assert_eq!(live.lock().unwrap()[0].local_hostname, "me.local");
    }
}
