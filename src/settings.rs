//! Settings Store - small key/value configuration persisted across sessions
//!
//! Holds the chosen model id, an optional agent id and an optional gateway
//! endpoint override. Stored as one JSON file under the platform config dir.

use crate::error::GatewayResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_MODEL: &str = "anthropic.claude-3.5-sonnet";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: default_model(),
            agent_id: None,
            endpoint: None,
        }
    }
}

/// Keys the store understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum SettingKey {
    Model,
    AgentId,
    Endpoint,
}

impl Settings {
    pub fn get(&self, key: SettingKey) -> Option<&str> {
        match key {
            SettingKey::Model => Some(self.model.as_str()),
            SettingKey::AgentId => self.agent_id.as_deref(),
            SettingKey::Endpoint => self.endpoint.as_deref(),
        }
    }

    /// Blank values clear the key; the model falls back to its default.
    pub fn set(&mut self, key: SettingKey, value: &str) {
        let value = value.trim();
        let value = (!value.is_empty()).then(|| value.to_string());
        match key {
            SettingKey::Model => self.model = value.unwrap_or_else(default_model),
            SettingKey::AgentId => self.agent_id = value,
            SettingKey::Endpoint => {
                self.endpoint = value.map(|url| url.trim_end_matches('/').to_string())
            }
        }
    }

    pub fn unset(&mut self, key: SettingKey) {
        self.set(key, "");
    }

    pub fn has_agent_id(&self) -> bool {
        self.agent_id.is_some()
    }
}

/// Default location of the settings file
pub fn default_settings_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("wizard-gateway").join("settings.json");
    }

    PathBuf::from(".wizard-gateway").join("settings.json")
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn open_default() -> Self {
        Self::new(default_settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files yield defaults.
    pub fn load(&self) -> Settings {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Settings::default(),
            Err(err) => {
                warn!("could not read settings from {}: {}", self.path.display(), err);
                return Settings::default();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!("ignoring corrupt settings file {}: {}", self.path.display(), err);
            Settings::default()
        })
    }

    pub fn save(&self, settings: &Settings) -> GatewayResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(settings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, body)?;
        Ok(())
    }

    /// Load, apply one change, save.
    pub fn update(&self, apply: impl FnOnce(&mut Settings)) -> GatewayResult<Settings> {
        let mut settings = self.load();
        apply(&mut settings);
        self.save(&settings)?;
        Ok(settings)
    }
}
