use std::path::Path;
use std::time::Duration;

use crate::foundation::core::{CoordinateScale, Rgba8};
use crate::foundation::error::{TrajviewError, TrajviewResult};
use crate::tags::ActionPalette;

/// Colors for the annotation roles of a track.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RoleColors {
    pub referred: Rgba8,
    pub related: Rgba8,
    pub neutral: Rgba8,
}

impl Default for RoleColors {
    fn default() -> Self {
        Self {
            referred: Rgba8::rgb(255, 0, 0),
            related: Rgba8::rgb(0, 0, 255),
            neutral: Rgba8::rgb(255, 255, 0),
        }
    }
}

/// Startup configuration. Every field has a default, so a config file only
/// needs the keys it overrides.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub meters_per_pixel: f64,
    pub base_interval_ms: u64,
    /// Multiplicative step for speed up/down.
    pub speed_factor: f64,
    /// Rows per window while reading track data.
    pub ingest_window_rows: usize,
    pub role_colors: RoleColors,
    pub actions: ActionPalette,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            meters_per_pixel: CoordinateScale::default().meters_per_pixel,
            base_interval_ms: 50,
            speed_factor: 1.5,
            ingest_window_rows: 10_000,
            role_colors: RoleColors::default(),
            actions: ActionPalette::default(),
        }
    }
}

impl ViewerConfig {
    pub fn load(path: &Path) -> TrajviewResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrajviewError::data_format(format!("read config '{}': {e}", path.display()))
        })?;
        let cfg: Self = serde_json::from_str(&text).map_err(|e| {
            TrajviewError::data_format(format!("parse config '{}': {e}", path.display()))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> TrajviewResult<()> {
        CoordinateScale::new(self.meters_per_pixel)?;
        if self.base_interval_ms == 0 {
            return Err(TrajviewError::validation("base_interval_ms must be > 0"));
        }
        if !(self.speed_factor.is_finite() && self.speed_factor > 1.0) {
            return Err(TrajviewError::validation("speed_factor must be finite and > 1"));
        }
        if self.ingest_window_rows == 0 {
            return Err(TrajviewError::validation("ingest_window_rows must be > 0"));
        }
        Ok(())
    }

    pub fn scale(&self) -> CoordinateScale {
        CoordinateScale {
            meters_per_pixel: self.meters_per_pixel,
        }
    }

    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ViewerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.base_interval(), Duration::from_millis(50));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let cfg: ViewerConfig =
            serde_json::from_str(r#"{ "base_interval_ms": 20, "speed_factor": 2.0 }"#).unwrap();
        assert_eq!(cfg.base_interval_ms, 20);
        assert_eq!(cfg.speed_factor, 2.0);
        assert_eq!(cfg.role_colors, RoleColors::default());
        assert_eq!(cfg.ingest_window_rows, 10_000);
    }

    #[test]
    fn load_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{ "speed_factor": 0.5 }"#).unwrap();
        assert!(matches!(
            ViewerConfig::load(&path),
            Err(TrajviewError::Validation(_))
        ));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ViewerConfig::load(&path),
            Err(TrajviewError::DataFormat(_))
        ));
    }
}
