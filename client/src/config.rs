//! Client tuning knobs.

use std::time::Duration;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_INVITE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadlines the engine enforces on its own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a sent command may stay unacknowledged before it counts as failed.
    pub command_timeout: Duration,
    /// Lifetime given to invites issued locally.
    pub invite_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            invite_ttl: DEFAULT_INVITE_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub player_name: String,
    pub engine: EngineConfig,
    /// How often deadlines are checked.
    pub tick_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Silence from the server after which the connection counts as lost.
    pub connection_timeout: Duration,
    /// Bound on the initial Connect handshake.
    pub connect_timeout: Duration,
    /// Artificial round-trip delay, split between send and receive.
    pub simulated_latency: Duration,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>, player_name: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            player_name: player_name.into(),
            engine: EngineConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            simulated_latency: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.engine.command_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_invite_ttl(mut self, ttl: Duration) -> Self {
        self.engine.invite_ttl = ttl;
        self
    }

    /// Values below 10ms are clamped to 10ms.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(10));
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(10));
        self
    }

    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_simulated_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = latency;
        self
    }
}
