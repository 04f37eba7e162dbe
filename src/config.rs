//! Configuration loading for SectorDesk.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the SectorDesk home directory (~/.sectordesk).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".sectordesk"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.sectordesk/settings.json, falling back to the
/// defaults when no file exists yet.
pub fn load_settings() -> Result<Settings> {
    let path = get_settings_path()?;

    if !path.exists() {
        tracing::debug!("No settings file at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let settings: Settings = serde_json::from_str(&content)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub bot: BotConfig,
    pub heartbeat: HeartbeatSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database. Defaults to <home>/sectordesk.db.
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_home_dir()?.join("sectordesk.db")),
        }
    }
}

/// Outbound WhatsApp Cloud API credentials. When disabled, replies are
/// logged instead of delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub enabled: bool,
    pub api_url: String,
    pub phone_number_id: String,
    pub access_token: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://graph.facebook.com/v18.0".to_string(),
            phone_number_id: String::new(),
            access_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Business hours window, "HH:MM".
    pub opens: String,
    pub closes: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            opens: "08:00".to_string(),
            closes: "18:00".to_string(),
        }
    }
}

impl BotConfig {
    pub fn business_hours(&self) -> Result<crate::bot::BusinessHours> {
        let parse = |value: &str| {
            chrono::NaiveTime::parse_from_str(value, "%H:%M")
                .map_err(|e| Error::Config(format!("invalid business hour '{}': {}", value, e)))
        };
        Ok(crate::bot::BusinessHours {
            opens: parse(&self.opens)?,
            closes: parse(&self.closes)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_secs: u64,
    pub grace_secs: u64,
    pub sweep_secs: u64,
    pub reconnect_backoff_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            grace_secs: 90,
            sweep_secs: 10,
            reconnect_backoff_secs: 5,
        }
    }
}

impl HeartbeatSettings {
    pub fn to_config(&self) -> crate::heartbeat::HeartbeatConfig {
        crate::heartbeat::HeartbeatConfig {
            interval: Duration::from_secs(self.interval_secs),
            grace: Duration::from_secs(self.grace_secs),
            sweep_every: Duration::from_secs(self.sweep_secs),
            reconnect_backoff: Duration::from_secs(self.reconnect_backoff_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert!(!settings.whatsapp.enabled);
        assert_eq!(settings.heartbeat.grace_secs, 90);
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"server": {"port": 9090}}"#).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.bot.opens, "08:00");
    }

    #[test]
    fn test_business_hours_parse() {
        let bot = BotConfig::default();
        let hours = bot.business_hours().unwrap();
        assert_eq!(hours.opens.format("%H:%M").to_string(), "08:00");

        let bad = BotConfig {
            opens: "25:99".to_string(),
            ..Default::default()
        };
        assert!(bad.business_hours().is_err());
    }
}
