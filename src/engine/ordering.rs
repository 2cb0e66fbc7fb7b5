//! Total order over displayed connections.
//!
//! Only structural fields take part in the comparison. Flags and traffic
//! counters never do, so inserting by merge and re-sorting always agree.

use crate::connection::DisplayedConnection;
use std::cmp::Ordering;

/// Type, then local endpoint, then remote endpoint, then owning process
pub fn compare(a: &DisplayedConnection, b: &DisplayedConnection) -> Ordering {
    a.connection_type
        .cmp(&b.connection_type)
        .then_with(|| a.local.ip().cmp(&b.local.ip()))
        .then_with(|| a.local.port().cmp(&b.local.port()))
        .then_with(|| a.remote.ip().cmp(&b.remote.ip()))
        .then_with(|| a.remote.port().cmp(&b.remote.port()))
        .then_with(|| a.pid.cmp(&b.pid))
        .then_with(|| a.process_name.cmp(&b.process_name))
}

pub fn sort_connections(connections: &mut [DisplayedConnection]) {
    connections.sort_by(compare);
}

/// Merge already-sorted `additions` into already-sorted `existing`.
///
/// On ties the existing entry goes first.
pub fn ordered_merge(existing: &mut Vec<DisplayedConnection>, additions: Vec<DisplayedConnection>) {
    if additions.is_empty() {
        return;
    }

    let current = std::mem::take(existing);
    existing.reserve(current.len() + additions.len());

    let mut current = current.into_iter().peekable();
    let mut additions = additions.into_iter().peekable();

    loop {
        let take_addition = match (current.peek(), additions.peek()) {
            (Some(have), Some(add)) => compare(add, have) == Ordering::Less,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };

        let next = if take_addition {
            additions.next()
        } else {
            current.next()
        };
        existing.extend(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, LiveConnection, Protocol};

    fn conn(protocol: Protocol, local: &str, remote: &str, pid: u32) -> DisplayedConnection {
        DisplayedConnection::from_live(&LiveConnection::new(
            protocol,
            local.parse().unwrap(),
            remote.parse().unwrap(),
            ConnectionState::Established,
            pid,
            format!("proc{}", pid),
        ))
    }

    fn keys(list: &[DisplayedConnection]) -> Vec<String> {
        list.iter().map(|c| c.key.to_string()).collect()
    }

    fn sample() -> Vec<DisplayedConnection> {
        vec![
            conn(Protocol::Udp, "0.0.0.0:53", "0.0.0.0:0", 3),
            conn(Protocol::Tcp, "10.0.0.1:5000", "1.1.1.1:443", 1),
            conn(Protocol::Tcp, "[::1]:8080", "[::1]:40000", 4),
            conn(Protocol::Tcp, "10.0.0.1:22", "10.0.0.9:51000", 2),
            conn(Protocol::Tcp, "10.0.0.1:5000", "1.0.0.1:443", 5),
        ]
    }

    #[test]
    fn test_tcp_before_tcp6_before_udp() {
        let mut list = sample();
        sort_connections(&mut list);

        let types: Vec<&str> = list.iter().map(|c| c.connection_type.as_str()).collect();
        assert_eq!(types, vec!["TCP", "TCP", "TCP", "TCPv6", "UDP"]);
        assert_eq!(list[0].local.port(), 22);
        assert_eq!(list[1].remote, "1.0.0.1:443".parse().unwrap());
    }

    #[test]
    fn test_sort_is_idempotent() {
        let mut once = sample();
        sort_connections(&mut once);
        let mut twice = once.clone();
        sort_connections(&mut twice);

        assert_eq!(keys(&once), keys(&twice));
    }

    #[test]
    fn test_flags_and_counters_do_not_affect_order() {
        let mut plain = sample();
        let mut flagged = sample();
        for (i, c) in flagged.iter_mut().enumerate() {
            c.is_new = i % 2 == 0;
            c.is_closed = i % 3 == 0;
            c.bytes_sent = 1000 - i as u64;
            c.has_data = true;
        }
        sort_connections(&mut plain);
        sort_connections(&mut flagged);

        assert_eq!(keys(&plain), keys(&flagged));
    }

    #[test]
    fn test_merge_matches_full_sort() {
        let all = sample();
        let (existing, additions) = all.split_at(2);

        let mut merged = existing.to_vec();
        sort_connections(&mut merged);
        let mut sorted_additions = additions.to_vec();
        sort_connections(&mut sorted_additions);
        ordered_merge(&mut merged, sorted_additions);

        let mut appended = existing.to_vec();
        appended.extend_from_slice(additions);
        sort_connections(&mut appended);

        assert_eq!(keys(&merged), keys(&appended));

        // and sorting after the merge changes nothing
        let mut resorted = merged.clone();
        sort_connections(&mut resorted);
        assert_eq!(keys(&merged), keys(&resorted));
    }

    #[test]
    fn test_merge_into_empty() {
        let mut existing = Vec::new();
        let mut additions = sample();
        sort_connections(&mut additions);
        ordered_merge(&mut existing, additions.clone());

        assert_eq!(keys(&existing), keys(&additions));
    }
}
