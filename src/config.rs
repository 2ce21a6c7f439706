use std::collections::HashMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};

use crate::types::RoomType;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub palette: PaletteConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Directory holding one `<city>.csv` listings snapshot per city
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Tukey fence multiplier applied to the price IQR
    pub outlier_multiplier: f64,
    /// Quiet period before a burst of map movements triggers a recompute
    pub debounce_ms: u64,
    /// Grid size of each density curve
    pub density_points: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            outlier_multiplier: 1.5,
            debounce_ms: 750,
            density_points: 512,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaletteConfig {
    // Room type label -> hex color
    pub room_types: HashMap<String, String>,
    pub fallback: String,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        let room_types = [
            (RoomType::EntireHome, "#1b9e77"),
            (RoomType::PrivateRoom, "#d95f02"),
            (RoomType::SharedRoom, "#7570b3"),
            (RoomType::HotelRoom, "#e7298a"),
        ]
        .into_iter()
        .map(|(room, color)| (room.label().to_string(), color.to_string()))
        .collect();

        Self {
            room_types,
            fallback: "#666666".to_string(),
        }
    }
}

impl PaletteConfig {
    pub fn color_for(&self, room_type: RoomType) -> &str {
        self.room_types
            .get(room_type.label())
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Front-end assets served at `/`
    pub static_dir: Option<PathBuf>,
    /// Sessions idle for longer than this are dropped
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

fn default_session_ttl() -> u64 {
    30 * 60
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [input]
            data_dir = "data"

            [server]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.input.data_dir, PathBuf::from("data"));
        assert_eq!(config.processing.debounce_ms, 750);
        assert_eq!(config.processing.outlier_multiplier, 1.5);
        assert!(config.server.static_dir.is_none());
        assert_eq!(config.server.session_ttl_secs, 1800);
        assert_eq!(config.palette.color_for(RoomType::PrivateRoom), "#d95f02");
    }

    #[test]
    fn palette_overrides_and_fallback() {
        let config: AppConfig = toml::from_str(
            r##"
            [input]
            data_dir = "data"

            [processing]
            debounce_ms = 200

            [palette]
            fallback = "#000000"

            [palette.room_types]
            "Entire home/apt" = "#ff0000"

            [server]
            port = 3000
            "##,
        )
        .unwrap();

        assert_eq!(config.processing.debounce_ms, 200);
        assert_eq!(config.processing.density_points, 512);
        assert_eq!(config.palette.color_for(RoomType::EntireHome), "#ff0000");
        assert_eq!(config.palette.color_for(RoomType::SharedRoom), "#000000");
    }
}
