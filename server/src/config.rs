use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "syncout", about = "Real-time collaborative code editor hub")]
pub struct Config {
    /// Address the HTTP and websocket listener binds to.
    #[arg(long, env = "SYNCOUT_BIND", default_value = "127.0.0.1:8001")]
    pub bind: String,

    /// Pending commands a session task buffers before senders wait.
    #[arg(long, env = "SYNCOUT_SESSION_BUFFER", default_value_t = 64)]
    pub session_buffer: usize,

    /// Outbound messages buffered per connection; a full buffer evicts the participant.
    #[arg(long, env = "SYNCOUT_OUTBOUND_BUFFER", default_value_t = 32)]
    pub outbound_buffer: usize,

    /// Seconds between websocket pings.
    #[arg(long, env = "SYNCOUT_HEARTBEAT_INTERVAL", default_value_t = 5)]
    pub heartbeat_interval: u64,

    /// Seconds of silence after which a connection is closed.
    #[arg(long, env = "SYNCOUT_CLIENT_TIMEOUT", default_value_t = 30)]
    pub client_timeout: u64,
}

impl Config {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            outbound_buffer: self.outbound_buffer.max(1),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval.max(1)),
            client_timeout: Duration::from_secs(self.client_timeout.max(1)),
        }
    }
}

/// Per-connection knobs shared with every gateway actor.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub outbound_buffer: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_buffer: 32,
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }
}
