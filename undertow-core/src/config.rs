//! Centralized configuration for Undertow.
//!
//! All cache timings and streaming parameters are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::time::Duration;

/// Central configuration for all Undertow components.
///
/// Groups related settings into logical sections and supports environment
/// variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub registry: RegistryConfig,
    pub janitor: JanitorConfig,
    pub streaming: StreamingConfig,
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
}

/// Engine registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long an engine may take to resolve metadata before the open fails
    pub open_timeout: Duration,
    /// Interval between swarm progress log lines for each live engine
    pub progress_log_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(30),
            progress_log_interval: Duration::from_secs(10),
        }
    }
}

/// Eviction timings for the two janitor sweeps.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Period of the idle-engine sweep
    pub idle_sweep_interval: Duration,
    /// Idle time after which an engine without readers is dropped
    pub idle_threshold: Duration,
    /// Period of the retention sweep
    pub retention_sweep_interval: Duration,
    /// Age of last access after which an unfinished engine is dropped
    pub retention_max_age: Duration,
    /// Watch fraction at which content counts as finished
    pub finished_fraction: f64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            idle_sweep_interval: Duration::from_secs(300), // 5 minutes
            idle_threshold: Duration::from_secs(600),      // 10 minutes
            retention_sweep_interval: Duration::from_secs(3600), // 1 hour
            retention_max_age: Duration::from_secs(24 * 3600), // 24 hours
            finished_fraction: 0.9,
        }
    }
}

/// HTTP range streaming configuration.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Maximum bytes pulled from an engine read stream per body chunk
    pub chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024, // 256 KiB
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long shutdown waits for open responses before closing engines anyway
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Returns the `host:port` string the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Simulated swarm configuration for development mode and tests.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Delay before a simulated engine reports metadata
    pub open_latency: Duration,
    /// Delay inserted before each simulated read chunk
    pub read_chunk_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            open_latency: Duration::from_millis(250),
            read_chunk_delay: Duration::ZERO,
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparsable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seconds) = env_parse::<u64>("UNDERTOW_OPEN_TIMEOUT") {
            config.registry.open_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_parse::<u64>("UNDERTOW_IDLE_THRESHOLD") {
            config.janitor.idle_threshold = Duration::from_secs(seconds);
        }

        if let Some(hours) = env_parse::<u64>("UNDERTOW_RETENTION_HOURS") {
            config.janitor.retention_max_age = Duration::from_secs(hours * 3600);
        }

        if let Some(fraction) = env_parse::<f64>("UNDERTOW_FINISHED_FRACTION") {
            if fraction.is_finite() && (0.0..=1.0).contains(&fraction) {
                config.janitor.finished_fraction = fraction;
            }
        }

        if let Some(host) = env_parse::<String>("UNDERTOW_HOST") {
            if !host.is_empty() {
                config.server.host = host;
            }
        }

        if let Some(port) = env_parse::<u16>("UNDERTOW_PORT") {
            config.server.port = port;
        }

        if let Some(seconds) = env_parse::<u64>("UNDERTOW_DRAIN_TIMEOUT") {
            config.server.drain_timeout = Duration::from_secs(seconds);
        }

        config
    }

    /// Creates a configuration with short timings for tests.
    pub fn for_testing() -> Self {
        Self {
            registry: RegistryConfig {
                open_timeout: Duration::from_millis(500),
                progress_log_interval: Duration::from_secs(3600),
            },
            simulation: SimulationConfig {
                open_latency: Duration::from_millis(10),
                read_chunk_delay: Duration::ZERO,
            },
            streaming: StreamingConfig {
                chunk_size: 64 * 1024,
            },
            server: ServerConfig {
                port: 0,
                drain_timeout: Duration::from_millis(500),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = UndertowConfig::default();

        assert_eq!(config.registry.open_timeout, Duration::from_secs(30));
        assert_eq!(config.janitor.idle_sweep_interval, Duration::from_secs(300));
        assert_eq!(config.janitor.idle_threshold, Duration::from_secs(600));
        assert_eq!(
            config.janitor.retention_max_age,
            Duration::from_secs(86_400)
        );
        assert_eq!(config.janitor.finished_fraction, 0.9);
        assert_eq!(config.server.bind_address(), "127.0.0.1:3000");
        assert_eq!(config.server.drain_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_testing_preset_is_fast() {
        let config = UndertowConfig::for_testing();
        assert!(config.registry.open_timeout < Duration::from_secs(1));
        assert!(config.simulation.open_latency < config.registry.open_timeout);
        assert!(config.server.drain_timeout < Duration::from_secs(1));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("UNDERTOW_OPEN_TIMEOUT", "45");
            std::env::set_var("UNDERTOW_RETENTION_HOURS", "48");
            std::env::set_var("UNDERTOW_FINISHED_FRACTION", "1.5");
            std::env::set_var("UNDERTOW_PORT", "not-a-port");
        }

        let config = UndertowConfig::from_env();

        assert_eq!(config.registry.open_timeout, Duration::from_secs(45));
        assert_eq!(
            config.janitor.retention_max_age,
            Duration::from_secs(48 * 3600)
        );
        // Out-of-range and unparsable values keep their defaults
        assert_eq!(config.janitor.finished_fraction, 0.9);
        assert_eq!(config.server.port, 3000);

        unsafe {
            std::env::remove_var("UNDERTOW_OPEN_TIMEOUT");
            std::env::remove_var("UNDERTOW_RETENTION_HOURS");
            std::env::remove_var("UNDERTOW_FINISHED_FRACTION");
            std::env::remove_var("UNDERTOW_PORT");
        }
    }
}
