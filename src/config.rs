use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

pub const CONFIG_ENV: &str = "MOBILITY_LEDGER_CONFIG";
pub const DATA_DIR_ENV: &str = "MOBILITY_LEDGER_DATA_DIR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Largest accepted distance between a message timestamp and receipt time.
    pub max_skew_secs: i64,
    /// Fraction of the other registered principals whose votes blacklist a target.
    pub blacklist_threshold: f64,
    pub exchange_period_days: i64,
    pub credential_period_days: i64,
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_skew_secs: 60,
            blacklist_threshold: 0.5,
            exchange_period_days: 120,
            credential_period_days: 365,
            data_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from `$MOBILITY_LEDGER_CONFIG` or `~/.mobility-ledger/config.toml`.
    ///
    /// # Errors
    /// Returns `Error::Config` when a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let mut p = dirs::home_dir()?;
                p.push(".mobility-ledger");
                p.push("config.toml");
                Some(p)
            });

        match path {
            Some(p) if p.exists() => Self::load_from(&p),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(data).map_err(|e| Error::Config(e.to_string()))?;
        if settings.max_skew_secs < 0 {
            return Err(Error::Config("max_skew_secs must not be negative".into()));
        }
        if !(0.0..=1.0).contains(&settings.blacklist_threshold) {
            return Err(Error::Config(
                "blacklist_threshold must lie within 0.0..=1.0".into(),
            ));
        }
        Ok(settings)
    }

    /// Directory the store writes into; the env override wins over the file.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Ok(custom) = std::env::var(DATA_DIR_ENV) {
            let dir = PathBuf::from(custom);
            fs::create_dir_all(&dir)?;
            return Ok(dir);
        }
        let dir = match &self.data_dir {
            Some(d) => d.clone(),
            None => dirs::home_dir()
                .ok_or_else(|| Error::Config("no home dir".into()))?
                .join(".mobility-ledger")
                .join("data"),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Source of "now" for freshness checks.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
