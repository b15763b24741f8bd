use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration loaded from TOML file, then overridden by
/// CLI flags. Every field has a built-in default so a missing or
/// partially-specified config file is never a hard failure.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub tracker: TrackerSettings,
    pub sessions: SessionSettings,
    pub visualization: VisualizationSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_host: String,
    pub bind_port: u16,
    pub idle_timeout_sec: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub conf_threshold: f32,
    pub nms_iou: f32,
    pub classes: Vec<String>,
    pub class_catalog: Vec<String>,
    pub class_catalog_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub enabled: bool,
    pub tracker_type: String,
    pub config_path: Option<PathBuf>,
    pub use_kalman: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub output_dir: PathBuf,
    pub default_fps: f64,
    pub segment_duration_s: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VisualizationSettings {
    pub enabled: bool,
    pub window_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            model: ModelSettings::default(),
            tracker: TrackerSettings::default(),
            sessions: SessionSettings::default(),
            visualization: VisualizationSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_host: Ipv4Addr::UNSPECIFIED.to_string(),
            bind_port: 7700,
            idle_timeout_sec: 60,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            conf_threshold: 0.25,
            nms_iou: 0.6,
            classes: Vec::new(),
            class_catalog: Vec::new(),
            class_catalog_path: None,
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tracker_type: "botsort".to_string(),
            config_path: None,
            use_kalman: true,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./sessions"),
            default_fps: 30.0,
            segment_duration_s: 10.0,
        }
    }
}

impl Default for VisualizationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            window_name: "worker-ai".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads `Default` overridden by `path` (if present): a missing
    /// config file falls back to defaults silently, but a
    /// present-and-unparsable one is an error.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_port, 7700);
        assert!(config.tracker.enabled);
        assert!((config.model.nms_iou - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn load_with_no_path_returns_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.sessions.default_fps, 30.0);
    }

    #[test]
    fn load_with_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Some(std::path::Path::new("/nonexistent/path.toml"))).unwrap();
        assert_eq!(config.server.bind_port, 7700);
    }
}
