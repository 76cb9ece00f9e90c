//! Configuration loader and validator for the ESI sync runner.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::jobs;
use crate::model::{Credentials, Owner, OwnerKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub esi: Esi,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// How many sync runs may be in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// ESI endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Esi {
    pub base_url: String,
    pub datasource: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub cache_responses: bool,
}

/// One owner and the jobs to run for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    pub owner: OwnerKind,
    pub id: i64,
    #[serde(flatten)]
    pub credentials: Credentials,
    pub jobs: Vec<String>,
}

impl TargetConfig {
    pub fn owner(&self) -> Owner {
        Owner::new(self.owner, self.id)
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Where ESI responses are cached between runs.
    pub fn cache_dir(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("esi-cache")
    }

    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/esi-sync.db",
            self.app.data_dir.trim_end_matches('/')
        )
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.concurrency == 0 {
        return Err(invalid("app.concurrency must be > 0"));
    }

    if cfg.esi.base_url.trim().is_empty() {
        return Err(invalid("esi.base_url must be non-empty"));
    }
    if url::Url::parse(&cfg.esi.base_url).is_err() {
        return Err(invalid("esi.base_url must be an absolute URL"));
    }
    if cfg.esi.datasource.trim().is_empty() {
        return Err(invalid("esi.datasource must be non-empty"));
    }
    if cfg.esi.user_agent.trim().is_empty() {
        return Err(invalid("esi.user_agent must be non-empty"));
    }
    if cfg.esi.timeout_seconds == 0 {
        return Err(invalid("esi.timeout_seconds must be > 0"));
    }

    for (i, target) in cfg.targets.iter().enumerate() {
        if target.id <= 0 {
            return Err(invalid(format!("targets[{}].id must be > 0", i)));
        }
        if target.jobs.is_empty() {
            return Err(invalid(format!("targets[{}].jobs must be non-empty", i)));
        }
        for name in &target.jobs {
            let Some(job) = jobs::find(name) else {
                return Err(invalid(format!("targets[{}]: unknown job '{}'", i, name)));
            };
            if job.owner_kind != target.owner {
                return Err(invalid(format!(
                    "targets[{}]: job '{}' runs for a {}, not a {}",
                    i,
                    name,
                    job.owner_kind.as_str(),
                    target.owner.as_str()
                )));
            }
        }
    }

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  concurrency: 4

esi:
  base_url: "https://esi.evetech.net/"
  datasource: "tranquility"
  user_agent: "esi-sync/0.1 (admin@example.com)"
  timeout_seconds: 30
  cache_responses: true

targets:
  - owner: corporation
    id: 98000001
    access_token: "YOUR_ACCESS_TOKEN"
    scopes:
      - esi-assets.read_corporation_assets.v1
      - esi-corporations.read_blueprints.v1
    roles:
      - Director
    jobs:
      - corporation_assets
      - corporation_blueprints
  - owner: character
    id: 90000001
    access_token: "YOUR_ACCESS_TOKEN"
    scopes:
      - esi-characters.read_contacts.v1
      - esi-characters.read_agents_research.v1
    jobs:
      - character_info
      - character_contacts
      - character_agents_research
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    fn invalid_msg(cfg: &Config) -> String {
        match validate(cfg).unwrap_err() {
            ConfigError::Invalid(msg) => msg,
            other => panic!("wrong error: {:?}", other),
        }
    }

    #[test]
    fn parse_example_ok() {
        let cfg = sample();
        validate(&cfg).unwrap();
        assert_eq!(cfg.targets.len(), 2);
        assert_eq!(cfg.targets[0].owner(), Owner::Corporation(98000001));
        assert_eq!(cfg.targets[0].credentials.roles, vec!["Director".to_string()]);
        assert!(cfg.targets[1].credentials.roles.is_empty());
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let yaml = r#"app:
  data_dir: "./data"
esi:
  base_url: "https://esi.evetech.net/"
  datasource: "tranquility"
  user_agent: "ua"
  timeout_seconds: 10
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.concurrency, 4);
        assert!(cfg.esi.cache_responses);
        assert!(cfg.targets.is_empty());
    }

    #[test]
    fn invalid_esi_settings() {
        let mut cfg = sample();
        cfg.esi.base_url = "not a url".into();
        assert!(invalid_msg(&cfg).contains("esi.base_url"));

        let mut cfg = sample();
        cfg.esi.timeout_seconds = 0;
        assert!(invalid_msg(&cfg).contains("timeout_seconds"));

        let mut cfg = sample();
        cfg.app.concurrency = 0;
        assert!(invalid_msg(&cfg).contains("concurrency"));
    }

    #[test]
    fn unknown_job_is_rejected() {
        let mut cfg = sample();
        cfg.targets[0].jobs.push("corporation_wallets".into());
        assert!(invalid_msg(&cfg).contains("unknown job 'corporation_wallets'"));
    }

    #[test]
    fn job_owner_kind_must_match_target() {
        let mut cfg = sample();
        cfg.targets[0].jobs = vec!["character_contacts".into()];
        assert!(invalid_msg(&cfg).contains("runs for a character"));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = sample();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert!(cfg.database_url().ends_with("/data/esi-sync.db"));
        assert_eq!(cfg.cache_dir(), data_path.join("esi-cache"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.esi.datasource, "tranquility");
    }
}
