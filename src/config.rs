use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.json";
pub const DATABASE_FILE: &str = "timevault.sqlite3";

const DATA_DIR_ENV: &str = "TIMEVAULT_DATA_DIR";
const USER_ENV: &str = "TIMEVAULT_USER";
const DEBUG_ENV: &str = "TIMEVAULT_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Directory holding the config file, timer state and database.
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Signed-in user; sessions are only recorded when set.
    pub user_id: Option<String>,
    pub recorder_timeout_secs: u64,
    pub notifications: bool,
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            user_id: None,
            recorder_timeout_secs: 10,
            notifications: true,
            debug: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("timevault"))
        .unwrap_or_else(|| PathBuf::from(".timevault"))
}

fn flag_enabled(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

impl AppConfig {
    /// Reads `config.json` from the data directory (env override first) and
    /// applies environment overrides on top.
    pub fn load() -> Result<Self> {
        let data_dir = env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let mut config = Self::load_from(&data_dir)?;
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    /// Missing file means defaults; an unparseable file is logged and ignored.
    pub fn load_from(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring invalid {}: {err}", path.display());
                Self::default()
            })
        } else {
            Self::default()
        };

        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user_id) = lookup(USER_ENV).filter(|value| !value.is_empty()) {
            self.user_id = Some(user_id);
        }
        if let Some(debug) = lookup(DEBUG_ENV) {
            self.debug = flag_enabled(&debug);
        }
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed to create data directory {}", self.data_dir.display())
        })?;
        let path = self.data_dir.join(CONFIG_FILE);
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(&path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn recorder_timeout(&self) -> Duration {
        Duration::from_secs(self.recorder_timeout_secs.max(1))
    }
}
