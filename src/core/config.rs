use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

use super::identity::IdStrategy;
use super::model::DEFAULT_SNOOZE_MINUTES;

/// Application settings, persisted as `settings.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Where pending requests and scheduled triggers are stored
    pub data_dir: PathBuf,
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: u64,
    #[serde(default)]
    pub id_strategy: IdStrategy,
    /// Whether the platform lets us schedule exact wake alarms
    #[serde(default = "default_exact_wake_permitted")]
    pub exact_wake_permitted: bool,
}

fn default_snooze_minutes() -> u64 {
    DEFAULT_SNOOZE_MINUTES
}

fn default_exact_wake_permitted() -> bool {
    true
}

impl Settings {
    pub fn snooze_millis(&self) -> u64 {
        self.snooze_minutes.saturating_mul(60 * 1000)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());

        Self {
            data_dir: PathBuf::from(home).join(".local/share/alarm-setter"),
            snooze_minutes: DEFAULT_SNOOZE_MINUTES,
            id_strategy: IdStrategy::default(),
            exact_wake_permitted: true,
        }
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(app_config_dir: PathBuf) -> Self {
        Self {
            config_path: app_config_dir.join("settings.json"),
        }
    }

    pub fn load(&self) -> Settings {
        if self.config_path.exists() {
            if let Ok(content) = fs::read_to_string(&self.config_path) {
                match serde_json::from_str(&content) {
                    Ok(settings) => return settings,
                    Err(e) => log::warn!("Ignoring malformed {:?}: {}", self.config_path, e),
                }
            }
        }
        Settings::default()
    }

    pub fn save(&self, settings: &Settings) -> io::Result<()> {
        // Ensure directory exists
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.config_path, content)
    }
}
