use shared::{WireFormat, WorldConfig};

/// Runtime settings for the server, built from command-line arguments.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the websocket listener binds to
    pub addr: String,
    pub world: WorldConfig,
    /// Encoding used for outbound frames
    pub format: WireFormat,
    pub max_clients: usize,
    /// Discrete events buffered per client before it is considered stalled
    pub event_queue_capacity: usize,
    /// Inbound messages buffered between connection tasks and the main loop
    pub inbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
            world: WorldConfig::default(),
            format: WireFormat::Json,
            max_clients: 64,
            event_queue_capacity: 256,
            inbound_capacity: 1024,
        }
    }
}

impl ServerConfig {
    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }
}
