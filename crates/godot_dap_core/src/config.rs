use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6006;

#[derive(Debug, Clone)]
pub struct DapConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Deadline applied to every command that does not carry its own.
    pub command_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub initialized_event_timeout: Duration,
    /// Godot never answers `stepOut`, so this one is kept short.
    pub step_out_timeout: Duration,
}

impl Default for DapConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(5),
            initialized_event_timeout: Duration::from_secs(5),
            step_out_timeout: Duration::from_secs(2),
        }
    }
}

impl DapConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("GODOT_DAP_HOST").unwrap_or(defaults.host);

        let port = std::env::var("GODOT_DAP_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let connect_timeout = env_millis("GODOT_DAP_CONNECT_TIMEOUT_MS")
            .unwrap_or(defaults.connect_timeout);

        let command_timeout =
            env_millis("GODOT_DAP_TIMEOUT_MS").unwrap_or(defaults.command_timeout);

        Self {
            host,
            port,
            connect_timeout,
            command_timeout,
            ..defaults
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
