use crate::error::ProviderError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tasks_core::config::EngineConfig;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// SQLite database file
    pub database_path: String,
    #[serde(default)]
    pub materialization: EngineConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            database_path: "tasks.db".to_string(),
            materialization: EngineConfig::default(),
        }
    }
}

impl ProviderConfig {
    /// Loads `config.toml` from the working directory, overridden by
    /// `TASKS_`-prefixed environment variables.
    pub fn new() -> Result<Self, ProviderError> {
        Self::from_file("config.toml")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let config = Figment::from(Serialized::defaults(ProviderConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TASKS_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = ProviderConfig::from_file("missing.toml").unwrap();
            assert_eq!(config, ProviderConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tasks.toml",
                r#"
                database_path = "/var/lib/tasks/tasks.db"

                [materialization]
                lookahead_days = 30
                "#,
            )?;
            jail.set_env("TASKS_MATERIALIZATION__MAX_INSTANCES", "50");

            let config = ProviderConfig::from_file("tasks.toml").unwrap();
            assert_eq!(config.database_path, "/var/lib/tasks/tasks.db");
            assert_eq!(config.materialization.lookahead_days, 30);
            assert_eq!(config.materialization.max_instances, 50);
            Ok(())
        });
    }
}
