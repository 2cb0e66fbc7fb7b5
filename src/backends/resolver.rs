// Reverse hostname resolution for connection endpoints

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};

/// Upper bound on remembered addresses, successful or not
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

type LookupFn = fn(&IpAddr) -> io::Result<String>;

/// Hostnames found for the two ends of a connection; empty when unresolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedHostnames {
    pub local: String,
    pub remote: String,
}

/// Best-effort hostname lookup. Implementations may block; callers run them
/// off the async executor and never wait on them from a cycle.
pub trait HostnameResolver: Send + Sync {
    fn resolve(&self, local: IpAddr, remote: IpAddr) -> ResolvedHostnames;
}

/// Bounded address -> name map, oldest entry evicted first.
///
/// Failed lookups are stored as an empty name so they are not retried.
struct HostnameCache {
    names: HashMap<IpAddr, String>,
    order: VecDeque<IpAddr>,
    capacity: usize,
}

impl HostnameCache {
    fn new(capacity: usize) -> Self {
        Self {
            names: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, ip: &IpAddr) -> Option<&String> {
        self.names.get(ip)
    }

    fn insert(&mut self, ip: IpAddr, name: String) {
        if self.names.insert(ip, name).is_some() {
            return;
        }
        self.order.push_back(ip);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.names.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

/// Reverse DNS through the system resolver, cached per address
pub struct DnsHostnameResolver {
    cache: Mutex<HostnameCache>,
    lookup: LookupFn,
}

impl Default for DnsHostnameResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsHostnameResolver {
    pub fn new() -> Self {
        Self::with_lookup(DEFAULT_CACHE_CAPACITY, dns_lookup::lookup_addr)
    }

    pub(crate) fn with_lookup(capacity: usize, lookup: LookupFn) -> Self {
        Self {
            cache: Mutex::new(HostnameCache::new(capacity)),
            lookup,
        }
    }

    fn lookup(&self, ip: IpAddr) -> String {
        if ip.is_unspecified() {
            return String::new();
        }

        if let Some(name) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ip)
        {
            return name.clone();
        }

        // Lock is not held across the lookup itself
        let name = match (self.lookup)(&ip) {
            Ok(name) => name,
            Err(e) => {
                log::debug!("Reverse lookup failed for {}: {}", ip, e);
                String::new()
            }
        };

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ip, name.clone());
        name
    }
}

impl HostnameResolver for DnsHostnameResolver {
    fn resolve(&self, local: IpAddr, remote: IpAddr) -> ResolvedHostnames {
        ResolvedHostnames {
            local: self.lookup(local),
            remote: self.lookup(remote),
        }
    }
}

/// Resolver that never finds anything
pub struct NullResolver;

impl HostnameResolver for NullResolver {
    fn resolve(&self, _local: IpAddr, _remote: IpAddr) -> ResolvedHostnames {
        ResolvedHostnames::default()
    }
}
