// Linux procfs-based connection source

use super::ConnectionSource;
use crate::backends::{BackendCapabilities, BackendPriority};
use crate::connection::{ConnectionState, LiveConnection, Protocol, unmap_ipv4};
use anyhow::{Context, Result};
use ::procfs::process::{FDTarget, all_processes};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Connection source using the Linux /proc filesystem
///
/// Sockets are read from:
/// - /proc/net/tcp, /proc/net/tcp6
/// - /proc/net/udp, /proc/net/udp6
///
/// and attributed to processes by matching socket inodes found under
/// /proc/[pid]/fd/. Sockets we cannot attribute (other users' processes
/// without privileges, kernel sockets) are reported with pid 0.
pub struct ProcfsConnectionSource;

impl ProcfsConnectionSource {
    pub fn new() -> Result<Self> {
        if !Self::is_available() {
            anyhow::bail!("procfs not available (is /proc mounted?)");
        }
        Ok(Self)
    }

    /// Build socket inode -> (pid, process name)
    fn socket_owners() -> Result<HashMap<u64, (u32, String)>> {
        let mut owners = HashMap::new();

        for process in all_processes()
            .context("Failed to enumerate /proc")?
            .flatten()
        {
            let pid = process.pid();
            let name = match process.stat() {
                Ok(stat) => stat.comm,
                Err(_) => continue, // exited while we were scanning
            };

            // Permission errors are expected for foreign processes
            if let Ok(fds) = process.fd() {
                for fd_info in fds.flatten() {
                    if let FDTarget::Socket(inode) = fd_info.target {
                        owners.insert(inode, (pid as u32, name.clone()));
                    }
                }
            }
        }

        Ok(owners)
    }
}

fn push_row(
    rows: &mut Vec<LiveConnection>,
    owners: &HashMap<u64, (u32, String)>,
    protocol: Protocol,
    local: SocketAddr,
    remote: SocketAddr,
    inode: u64,
    state: String,
) {
    let (pid, name) = owners
        .get(&inode)
        .map(|(pid, name)| (*pid, name.clone()))
        .unwrap_or_default();

    // tcp6/udp6 list IPv4 peers of dual-stack sockets as ::ffff:a.b.c.d
    rows.push(LiveConnection::new(
        protocol,
        unmap_ipv4(local),
        unmap_ipv4(remote),
        ConnectionState::from_procfs_name(&state),
        pid,
        name,
    ));
}

impl ConnectionSource for ProcfsConnectionSource {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Best
    }

    fn is_available() -> bool {
        std::path::Path::new("/proc/net/tcp").exists()
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            ipv4_support: true,
            ipv6_support: true,
            per_process: true,
            per_connection: true,
        }
    }

    fn fetch_connections(&self) -> Result<Vec<LiveConnection>> {
        let owners = Self::socket_owners()?;
        let mut rows = Vec::new();

        let tcp = ::procfs::net::tcp().context("Failed to read /proc/net/tcp")?;
        for entry in tcp {
            push_row(
                &mut rows,
                &owners,
                Protocol::Tcp,
                entry.local_address,
                entry.remote_address,
                entry.inode,
                format!("{:?}", entry.state),
            );
        }

        // IPv6 tables are absent when the kernel has IPv6 disabled
        if let Ok(tcp6) = ::procfs::net::tcp6() {
            for entry in tcp6 {
                push_row(
                    &mut rows,
                    &owners,
                    Protocol::Tcp,
                    entry.local_address,
                    entry.remote_address,
                    entry.inode,
                    format!("{:?}", entry.state),
                );
            }
        }

        let udp = ::procfs::net::udp().context("Failed to read /proc/net/udp")?;
        for entry in udp {
            push_row(
                &mut rows,
                &owners,
                Protocol::Udp,
                entry.local_address,
                entry.remote_address,
                entry.inode,
                format!("{:?}", entry.state),
            );
        }

        if let Ok(udp6) = ::procfs::net::udp6() {
            for entry in udp6 {
                push_row(
                    &mut rows,
                    &owners,
                    Protocol::Udp,
                    entry.local_address,
                    entry.remote_address,
                    entry.inode,
                    format!("{:?}", entry.state),
                );
            }
        }

        log::trace!(
            "procfs snapshot: {} rows, {} owned sockets",
            rows.len(),
            owners.len()
        );

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionType, PacketObserved};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_mapped_row_matches_ipv4_packets() {
        let mut owners = HashMap::new();
        owners.insert(4242, (77, "sshd".to_string()));

        let mut rows = Vec::new();
        push_row(
            &mut rows,
            &owners,
            Protocol::Tcp,
            addr("[::ffff:10.0.0.1]:22"),
            addr("[::ffff:10.0.0.9]:51000"),
            4242,
            "Established".to_string(),
        );

        let row = &rows[0];
        assert_eq!(row.connection_type, ConnectionType::Tcp);
        assert_eq!(row.pid, 77);
        assert_eq!(row.local, addr("10.0.0.1:22"));

        // Inbound packet as seen on the wire
        let packet = PacketObserved::from_endpoints(
            Protocol::Tcp,
            addr("10.0.0.9:51000"),
            addr("10.0.0.1:22"),
            60,
        );
        assert_eq!(row.key, packet.key2);
    }

    #[test]
    fn test_unowned_socket_gets_pid_zero() {
        let mut rows = Vec::new();
        push_row(
            &mut rows,
            &HashMap::new(),
            Protocol::Udp,
            addr("[::1]:5353"),
            addr("[::]:0"),
            1,
            "Close".to_string(),
        );

        assert_eq!(rows[0].pid, 0);
        assert!(rows[0].process_name.is_empty());
        assert_eq!(rows[0].connection_type, ConnectionType::Udp6);
        assert_eq!(rows[0].state, ConnectionState::Closed);
    }
}
