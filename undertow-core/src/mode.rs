//! Runtime mode selection for Undertow.

use serde::{Deserialize, Serialize};

/// Runtime mode for the streaming cache.
///
/// Development mode wires an in-process simulated swarm so the whole HTTP
/// surface works offline. Production mode expects the embedding application
/// to install a real swarm backend; without one every route reports the
/// engine as unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Real swarm backend supplied by the deployment
    Production,
    /// Simulated swarm with a demo catalog
    #[default]
    Development,
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
        }
    }
}

impl std::str::FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            _ => Err(format!(
                "Invalid runtime mode: '{s}'. Valid options are: production, development"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_mode_parsing() {
        assert_eq!("prod".parse::<RuntimeMode>(), Ok(RuntimeMode::Production));
        assert_eq!(
            "Development".parse::<RuntimeMode>(),
            Ok(RuntimeMode::Development)
        );
        assert!("staging".parse::<RuntimeMode>().is_err());
    }

    #[test]
    fn test_runtime_mode_display_round_trips() {
        for mode in [RuntimeMode::Production, RuntimeMode::Development] {
            assert_eq!(mode.to_string().parse::<RuntimeMode>(), Ok(mode));
        }
        assert_eq!(RuntimeMode::default(), RuntimeMode::Development);
    }
}
