//! Centralized configuration for the engine boundary layer.
//!
//! Timeout values are policy, not protocol: any value is acceptable as long
//! as it is consistent per call kind. The defaults here match what the
//! desktop client ships with.

use std::time::Duration;

/// Timeout class selected by the call site, never inferred from payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Bounded local computation on the engine side (scan, upsert, hydrate).
    Short,
    /// Calls that perform further network I/O on the engine side (search).
    Long,
}

impl TimeoutClass {
    pub fn duration(self) -> Duration {
        match self {
            TimeoutClass::Short => EngineConfig::SHORT_CALL_TIMEOUT,
            TimeoutClass::Long => EngineConfig::LONG_CALL_TIMEOUT,
        }
    }
}

/// Engine client configuration.
pub struct EngineConfig;

impl EngineConfig {
    /// Timeout for the short class: bounded local computation.
    pub const SHORT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
    /// Timeout for the long class: engine-side network I/O.
    pub const LONG_CALL_TIMEOUT: Duration = Duration::from_secs(120);
    /// TCP connect timeout when dialing a remote engine.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// How long to wait for the engine's READY signal after connecting.
    pub const READY_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Wire protocol limits.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Maximum size of a single frame payload (16 MiB).
    pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
    /// Default capacity of the zero-copy reply buffer (256 KiB).
    pub const FAST_PATH_CAPACITY: usize = 256 * 1024;
    /// Maximum concurrent connections the reference engine server accepts.
    pub const MAX_ENGINE_CONNECTIONS: usize = 16;
}
