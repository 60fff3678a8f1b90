use std::path::PathBuf;
use std::time::Duration;

use tavla_core::{IdentityId, OwnIdentity};
use tavla_sync::ManagerConfig;

/// Node configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub startup_delay_secs: u64,
    pub maintenance_period_secs: u64,
    pub task_interval_secs: u64,
    pub own_identities: Vec<OwnIdentity>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("TAVLA_DB_PATH")
            .unwrap_or_else(|_| "./tavla.redb".to_string())
            .into();

        let startup_delay_secs = Self::parse_secs("TAVLA_STARTUP_DELAY_SECS", 180)?;
        let maintenance_period_secs = Self::parse_secs("TAVLA_MAINTENANCE_PERIOD_SECS", 900)?;
        if maintenance_period_secs == 0 {
            return Err(ConfigError::Invalid(
                "TAVLA_MAINTENANCE_PERIOD_SECS",
                "must be greater than zero",
            ));
        }
        let task_interval_secs = Self::parse_secs("TAVLA_TASK_INTERVAL_SECS", 60)?;
        if task_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "TAVLA_TASK_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }

        let own_identities = match std::env::var("TAVLA_OWN_IDENTITIES") {
            Ok(s) => Self::parse_own_identities(&s)?,
            Err(_) => Vec::new(),
        };

        Ok(Config {
            db_path,
            startup_delay_secs,
            maintenance_period_secs,
            task_interval_secs,
            own_identities,
        })
    }

    fn parse_secs(var: &'static str, default: u64) -> Result<u64, ConfigError> {
        match std::env::var(var) {
            Ok(s) => s
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(var, "must be a number of seconds")),
            Err(_) => Ok(default),
        }
    }

    /// Expected format: "id@routingkey,id@routingkey".
    pub fn parse_own_identities(s: &str) -> Result<Vec<OwnIdentity>, ConfigError> {
        let mut identities = Vec::new();
        for entry in s.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let Some((id, routing_key)) = entry.split_once('@') else {
                return Err(ConfigError::Invalid(
                    "TAVLA_OWN_IDENTITIES",
                    "expected format: id@routingkey (e.g. alice@SSK-abc)",
                ));
            };
            if routing_key.is_empty() {
                return Err(ConfigError::Invalid(
                    "TAVLA_OWN_IDENTITIES",
                    "routing key must not be empty",
                ));
            }
            let id = IdentityId::new(id)
                .map_err(|_| ConfigError::Invalid("TAVLA_OWN_IDENTITIES", "invalid identity id"))?;

            identities.push(OwnIdentity::new(id.clone(), id.as_str(), routing_key));
        }
        Ok(identities)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            startup_delay: Duration::from_secs(self.startup_delay_secs),
            period: Duration::from_secs(self.maintenance_period_secs),
        }
    }

    pub fn task_interval(&self) -> Duration {
        Duration::from_secs(self.task_interval_secs)
    }

    /// Create a test configuration.
    #[cfg(test)]
    pub fn for_testing(db_path: PathBuf) -> Self {
        Config {
            db_path,
            startup_delay_secs: 0,
            maintenance_period_secs: 1,
            task_interval_secs: 1,
            own_identities: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid(&'static str, &'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid(var, msg) => write!(f, "Invalid value for {}: {}", var, msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_own_identities() {
        let ids = Config::parse_own_identities("alice@SSK-a, bob@SSK-b,").unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].id.as_str(), "alice");
        assert_eq!(ids[0].routing_key, "SSK-a");
        assert!(ids[0].own);
        assert_eq!(ids[1].id.as_str(), "bob");
    }

    #[test]
    fn test_parse_own_identities_rejects_bad_entries() {
        assert!(Config::parse_own_identities("alice").is_err());
        assert!(Config::parse_own_identities("alice@").is_err());
        assert!(Config::parse_own_identities("al ice@key").is_err());
        assert!(Config::parse_own_identities("").unwrap().is_empty());
    }

    #[test]
    fn test_manager_config() {
        let mut config = Config::for_testing(PathBuf::from("/tmp/tavla-test.redb"));
        config.startup_delay_secs = 3;
        config.maintenance_period_secs = 10;
        let manager = config.manager_config();
        assert_eq!(manager.startup_delay, Duration::from_secs(3));
        assert_eq!(manager.period, Duration::from_secs(10));
    }
}
