use anyhow::{Context, Result, bail};
use extract::{AliasPolicy, AliasTable, Deduplicator, FuzzyPolicy};
use index::{BridgeOptions, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub neo4j: Neo4jConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub checkpoint: CheckpointConfig,
    pub dedup: DedupConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub attempt_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    pub report_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Also merge names that contain each other or share most words.
    pub fuzzy: bool,
    /// Extra synonyms: canonical name -> aliases.
    pub aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Serve the progress endpoints on this address while running.
    pub listen: Option<String>,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            verify: true,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
            attempt_timeout_secs: 30,
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/checkpoint.json"),
            report_path: PathBuf::from("data/last_run.json"),
        }
    }
}

/// Connection settings taken from the environment, applied over the file.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub uri: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            uri: std::env::var("NEO4J_URI").ok(),
            user: std::env::var("NEO4J_USER").ok(),
            password: std::env::var("NEO4J_PASSWORD").ok(),
        }
    }
}

impl BridgeConfig {
    /// Defaults, then the TOML file if given, then environment overrides.
    pub fn load(path: Option<&Path>, env: &EnvOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse error in {}", path.display()))
    }

    pub fn apply_env(&mut self, env: &EnvOverrides) {
        if let Some(uri) = &env.uri {
            self.neo4j.uri = uri.clone();
        }
        if let Some(user) = &env.user {
            self.neo4j.user = user.clone();
        }
        if let Some(password) = &env.password {
            self.neo4j.password = password.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            bail!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms
            );
        }
        if self.retry.attempt_timeout_secs == 0 {
            bail!("attempt_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
        .with_attempt_timeout(Duration::from_secs(self.retry.attempt_timeout_secs))
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            batch_size: self.batch.batch_size,
            retry: self.retry_policy(),
            verify: self.batch.verify,
        }
    }

    pub fn deduplicator(&self) -> Deduplicator {
        let mut table = AliasTable::qsr();
        for (canonical, aliases) in &self.dedup.aliases {
            table.add(canonical, aliases.iter().map(String::as_str));
        }
        if self.dedup.fuzzy {
            Deduplicator::new(FuzzyPolicy::new(table))
        } else {
            Deduplicator::new(AliasPolicy::new(table))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{EntityRecord, RecordSet};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.batch_size, 500);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[batch]
batch_size = 50

[neo4j]
uri = "bolt://graph:7687"

[dedup]
fuzzy = true
aliases = {{ "Walk-in Cooler" = ["WIC"] }}
"#
        )
        .unwrap();

        let config = BridgeConfig::load(Some(file.path()), &EnvOverrides::default()).unwrap();
        assert_eq!(config.batch.batch_size, 50);
        assert!(config.batch.verify);
        assert_eq!(config.neo4j.uri, "bolt://graph:7687");
        assert_eq!(config.neo4j.user, "neo4j");
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.dedup.fuzzy);
        assert_eq!(config.dedup.aliases["Walk-in Cooler"], vec!["WIC".to_string()]);
    }

    #[test]
    fn test_env_overrides_file() {
        let env = EnvOverrides {
            uri: Some("bolt://prod:7687".into()),
            user: None,
            password: Some("secret".into()),
        };
        let config = BridgeConfig::load(None, &env).unwrap();
        assert_eq!(config.neo4j.uri, "bolt://prod:7687");
        assert_eq!(config.neo4j.user, "neo4j");
        assert_eq!(config.neo4j.password, "secret");
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = BridgeConfig::default();
        config.batch.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[batch\nbatch_size = ").unwrap();
        let err = BridgeConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parse error"));
    }

    #[test]
    fn test_configured_aliases_reach_deduplicator() {
        let mut config = BridgeConfig::default();
        config
            .dedup
            .aliases
            .insert("Walk-in Cooler".into(), vec!["WIC".into()]);

        let mut set = RecordSet::new();
        set.insert_entity(EntityRecord::new("a", "Walk-in Cooler", "equipment"));
        set.insert_entity(EntityRecord::new("b", "WIC", "equipment"));

        let outcome = config.deduplicator().deduplicate(set);
        assert_eq!(outcome.merged_entities, 1);
    }
}
