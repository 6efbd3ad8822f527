use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use serde::Deserialize;

const CONFIG_FILENAME: &str = "ghmon.toml";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 15 * 60;
const DEFAULT_SEEN_DELAY_SECS: u64 = 5;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub own_query: Option<String>,
    pub review_query: Option<String>,
    pub refresh_interval_secs: Option<u64>,
    pub seen_delay_secs: Option<u64>,
    pub state_dir: Option<PathBuf>,
}

impl Config {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(
            self.refresh_interval_secs
                .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS),
        )
    }

    pub fn seen_delay(&self) -> Duration {
        Duration::from_secs(self.seen_delay_secs.unwrap_or(DEFAULT_SEEN_DELAY_SECS))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| config_directory().join("ghmon"))
    }

    pub fn pull_request_dir(&self) -> PathBuf {
        self.state_dir().join("pull-requests")
    }

    /// Applies `GHMON_*` overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(own_query) = lookup("GHMON_OWN_QUERY") {
            self.own_query = Some(own_query);
        }
        if let Some(review_query) = lookup("GHMON_REVIEW_QUERY") {
            self.review_query = Some(review_query);
        }
        if let Some(interval) = lookup("GHMON_REFRESH_INTERVAL") {
            let secs = interval.trim().parse::<u64>().with_context(|| {
                format!("GHMON_REFRESH_INTERVAL must be seconds, got {interval:?}")
            })?;
            self.refresh_interval_secs = Some(secs);
        }
        if let Some(state_dir) = lookup("GHMON_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(state_dir));
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval_secs == Some(0) {
            bail!("refresh interval must be at least one second");
        }
        let queries = [
            ("own_query", &self.own_query),
            ("review_query", &self.review_query),
        ];
        for (name, query) in queries {
            if query.as_deref().is_some_and(|query| query.trim().is_empty()) {
                bail!("{name} must not be blank, leave it out to use the defaults");
            }
        }
        Ok(())
    }
}

pub fn config_directory() -> PathBuf {
    env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(env::var("HOME").unwrap_or_else(|_| ".".to_string())).join(".config")
        })
}

fn default_config_path() -> PathBuf {
    config_directory().join("ghmon").join(CONFIG_FILENAME)
}

fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(e) => bail!("Failed to read config file {}: {e}", path.display()),
    };

    match toml::from_str(&contents) {
        Ok(config) => Ok(config),
        Err(e) => bail!("Could not parse config {}: {e}", path.display()),
    }
}

/// Loads the config file (`--config`, then `GHMON_CONFIG_FILE`, then the
/// default location) and layers environment overrides on top.
pub fn load_config(config_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = config_path
        .or(env::var("GHMON_CONFIG_FILE").ok().map(PathBuf::from))
        .unwrap_or_else(default_config_path);

    let mut config = read_config_file(&path)?;
    config.apply_env(|key| env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}
