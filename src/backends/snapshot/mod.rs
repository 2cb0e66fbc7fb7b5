// Connection snapshot backends
//
// A snapshot source enumerates every OS-level TCP/UDP socket on demand and
// attributes it to its owning process where possible:
// - Linux: procfs (/proc/net/{tcp,tcp6,udp,udp6} + /proc/<pid>/fd)

use super::{BackendCapabilities, BackendPriority};
use crate::connection::LiveConnection;
use anyhow::Result;

#[cfg(target_os = "linux")]
mod procfs;

#[cfg(target_os = "linux")]
pub use self::procfs::ProcfsConnectionSource;

/// Source of full connection snapshots
pub trait ConnectionSource: Send + Sync {
    /// Backend name (e.g., "procfs")
    fn name(&self) -> &'static str;

    /// Backend priority for auto-selection
    fn priority(&self) -> BackendPriority;

    /// Check if this backend is available on the current system
    fn is_available() -> bool
    where
        Self: Sized;

    fn capabilities(&self) -> BackendCapabilities;

    /// Fetch every current connection.
    ///
    /// An error means the source is temporarily unavailable; callers skip the
    /// tick and try again on the next one.
    fn fetch_connections(&self) -> Result<Vec<LiveConnection>>;
}

/// Connection source metadata for selection
#[derive(Debug, Clone)]
pub struct ConnectionSourceInfo {
    pub name: &'static str,
    pub priority: BackendPriority,
    pub available: bool,
}

/// Detect all connection sources compiled in for this platform
pub fn detect_connection_sources() -> Vec<ConnectionSourceInfo> {
    let mut sources = Vec::new();

    #[cfg(target_os = "linux")]
    {
        sources.push(ConnectionSourceInfo {
            name: "procfs",
            priority: BackendPriority::Best,
            available: ProcfsConnectionSource::is_available(),
        });
    }

    sources
}

/// Select a connection source, honouring an explicit preference
pub fn select_connection_source(preference: Option<&str>) -> Result<Box<dyn ConnectionSource>> {
    if let Some(name) = preference {
        return create_connection_source(name);
    }

    detect_connection_sources()
        .into_iter()
        .filter(|info| info.available)
        .filter_map(|info| match create_connection_source(info.name) {
            Ok(source) => Some(source),
            Err(e) => {
                log::debug!("Skipping connection source {}: {:#}", info.name, e);
                None
            }
        })
        .max_by_key(|source| source.priority())
        .ok_or_else(|| anyhow::anyhow!("No connection source available"))
}

fn create_connection_source(name: &str) -> Result<Box<dyn ConnectionSource>> {
    match name {
        #[cfg(target_os = "linux")]
        "procfs" => Ok(Box::new(ProcfsConnectionSource::new()?)),

        _ => Err(anyhow::anyhow!("Unknown connection source: {}", name)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Replays whatever snapshot the test queued, or fails when told to
    pub struct StaticConnectionSource {
        rows: Mutex<Option<Vec<LiveConnection>>>,
    }

    impl StaticConnectionSource {
        pub fn new(rows: Vec<LiveConnection>) -> Self {
            Self {
                rows: Mutex::new(Some(rows)),
            }
        }

        pub fn set(&self, rows: Option<Vec<LiveConnection>>) {
            *self.rows.lock().unwrap() = rows;
        }
    }

    impl ConnectionSource for StaticConnectionSource {
        fn name(&self) -> &'static str {
            "static"
        }

        fn priority(&self) -> BackendPriority {
            BackendPriority::Fallback
        }

        fn is_available() -> bool {
            true
        }

        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities::default()
        }

        fn fetch_connections(&self) -> Result<Vec<LiveConnection>> {
            self.rows
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("snapshot unavailable"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_source_is_rejected() {
        assert!(select_connection_source(Some("does-not-exist")).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_procfs_is_listed_on_linux() {
        let sources = detect_connection_sources();
        assert!(sources.iter().any(|s| s.name == "procfs"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_auto_selection_ranks_by_backend_priority() {
        if !ProcfsConnectionSource::is_available() {
            return;
        }

        let source = select_connection_source(None).unwrap();
        assert_eq!(source.name(), "procfs");
        assert_eq!(source.priority(), BackendPriority::Best);
        assert!(source.capabilities().per_process);
    }
}
