use crate::party::default_queues;
use shared::QueueDefinition;
use std::time::Duration;

/// Server runtime settings. Defaults match the client defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Invite expiry and matchmaking run once per tick
    pub tick_interval: Duration,
    pub max_clients: usize,
    pub client_timeout: Duration,
    pub invite_ttl: Duration,
    pub queues: Vec<QueueDefinition>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            tick_interval: Duration::from_millis(100),
            max_clients: 64,
            client_timeout: Duration::from_secs(5),
            invite_ttl: Duration::from_secs(60),
            queues: default_queues(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: &str) -> Self {
        Self {
            bind_addr: bind_addr.to_string(),
            ..Self::default()
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_client_timeout(mut self, client_timeout: Duration) -> Self {
        self.client_timeout = client_timeout;
        self
    }

    pub fn with_invite_ttl(mut self, invite_ttl: Duration) -> Self {
        self.invite_ttl = invite_ttl;
        self
    }

    pub fn with_queues(mut self, queues: Vec<QueueDefinition>) -> Self {
        self.queues = queues;
        self
    }
}
