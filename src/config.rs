use serde::Serialize;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8050;
const DEFAULT_MAX_UPLOAD: usize = 32 * 1024 * 1024;

/// Server settings
///
/// The server always starts with [`ServerConfig::default`]; there are no
/// command-line flags or environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Debug mode logs at `debug` level by default
    pub debug: bool,

    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            debug: true,
            max_upload_bytes: DEFAULT_MAX_UPLOAD,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Default log filter when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_serve_locally_in_debug_mode() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8050");
        assert!(config.debug);
        assert_eq!(config.log_filter(), "debug");
        assert_eq!(config.max_upload_bytes, 32 * 1024 * 1024);
    }

    #[test]
    fn quiet_logging_without_debug() {
        let config = ServerConfig {
            debug: false,
            ..ServerConfig::default()
        };
        assert_eq!(config.log_filter(), "info");
    }
}
