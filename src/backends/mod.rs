// Backend trait definitions and core types

pub mod capture;
pub mod resolver;
pub mod snapshot;

/// Backend priority ranking (higher = better)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackendPriority {
    Fallback = 1, // Works but limited
    Good = 2,     // Solid implementation
    Better = 3,   // Modern, efficient
    Best = 4,     // Native APIs
}

/// Capabilities that a backend supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    pub ipv4_support: bool,
    pub ipv6_support: bool,
    pub per_process: bool,
    pub per_connection: bool,
}
