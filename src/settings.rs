use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const GEMINI_KEY_VAR: &str = "GEMINI_API_KEY";
pub const POLLINATIONS_KEY_VAR: &str = "POLLINATIONS_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub gemini_api_key: Option<String>,
    pub pollinations_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub gemini_base_url: Option<String>,
    pub image_model: Option<String>,
    pub image_base_url: Option<String>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
}

impl Settings {
    pub fn gemini_model(&self) -> &str {
        self.gemini_model.as_deref().unwrap_or("gemini-2.0-flash")
    }

    pub fn gemini_base_url(&self) -> &str {
        self.gemini_base_url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com/v1beta")
    }

    pub fn image_model(&self) -> &str {
        self.image_model.as_deref().unwrap_or("flux")
    }

    pub fn image_base_url(&self) -> &str {
        self.image_base_url
            .as_deref()
            .unwrap_or("https://image.pollinations.ai")
    }

    pub fn image_width(&self) -> u32 {
        self.image_width.unwrap_or(1024)
    }

    pub fn image_height(&self) -> u32 {
        self.image_height.unwrap_or(1024)
    }

    /// Credentials absent from both the settings file and the environment.
    /// Checked once at startup; generation stays disabled until the keys
    /// appear, while store and UI events keep working.
    pub fn missing_keys(&self) -> Vec<ConfigError> {
        let mut missing = Vec::new();
        if self.gemini_api_key.is_none() {
            missing.push(ConfigError::MissingKey(GEMINI_KEY_VAR));
        }
        if self.pollinations_api_key.is_none() {
            missing.push(ConfigError::MissingKey(POLLINATIONS_KEY_VAR));
        }
        missing
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn load_settings_from_dir(data_dir: &Path) -> Settings {
    let path = settings_path(data_dir);
    let mut s = if let Ok(bytes) = fs::read(&path) {
        serde_json::from_slice::<Settings>(&bytes).unwrap_or_default()
    } else {
        Settings::default()
    };
    if s.gemini_api_key.is_none() {
        s.gemini_api_key = std::env::var(GEMINI_KEY_VAR).ok();
    }
    if s.pollinations_api_key.is_none() {
        s.pollinations_api_key = std::env::var(POLLINATIONS_KEY_VAR).ok();
    }
    s
}

pub fn save_settings_to_dir(data_dir: &Path, s: &Settings) -> Result<()> {
    let path = settings_path(data_dir);
    let json = serde_json::to_vec_pretty(s)?;
    fs::write(path, json).context("write settings")?;
    Ok(())
}
