//! Session settings file.
//!
//! Every field has a default, so an empty file (or no file at all) gives
//! a working session.

use crate::capture::{NameTemplate, DEFAULT_TEMPLATE};
use crate::session::DEFAULT_OFFSET_SAMPLES;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings validation and loading errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("clock offset needs at least one sample")]
    InvalidOffsetSamples,
    #[error("delay tolerance must be a non-negative number of milliseconds")]
    InvalidDelayTolerance,
    #[error("image timeout factor must be positive and the floor at least 1 ms")]
    InvalidImageTimeout,
    #[error("stream buffer count must be at least 1")]
    InvalidBufferCount,
    #[error("invalid name template: {0}")]
    InvalidNameTemplate(String),
    #[error("failed to read settings file: {0}")]
    FileReadError(String),
    #[error("failed to parse settings file: {0}")]
    ParseError(String),
}

/// Clock offset estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    /// Latch samples per estimate.
    pub offset_samples: usize,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            offset_samples: DEFAULT_OFFSET_SAMPLES,
        }
    }
}

/// Capture pacing, timeouts and stream setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Pacing overshoot (ms) above which a warning is logged.
    pub delay_tolerance_ms: f64,
    /// Image timeout in frame periods.
    pub timeout_factor: f64,
    /// Lower bound of the image timeout (ms).
    pub timeout_floor_ms: u64,
    /// Driver buffers per camera during a capture.
    pub stream_buffer_count: u32,
    /// Default file name template.
    pub name_template: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            delay_tolerance_ms: 1.0,
            timeout_factor: 5.0,
            timeout_floor_ms: 5000,
            stream_buffer_count: 10,
            name_template: DEFAULT_TEMPLATE.to_owned(),
        }
    }
}

impl CaptureSettings {
    /// Image timeout for a camera running at `resulting_fps`.
    ///
    /// `timeout_factor` frame periods, but never below the floor. Unknown
    /// or non-positive frame rates get the floor.
    pub fn image_timeout(&self, resulting_fps: f64) -> Duration {
        let floor = self.timeout_floor_ms;
        if !(resulting_fps.is_finite() && resulting_fps > 0.0) {
            return Duration::from_millis(floor);
        }
        let periods = (self.timeout_factor * 1e3 / resulting_fps) as u64;
        Duration::from_millis(periods.max(floor))
    }

    /// Delay tolerance as a duration.
    pub fn delay_tolerance(&self) -> Duration {
        Duration::from_micros((self.delay_tolerance_ms.max(0.0) * 1e3).round() as u64)
    }
}

/// Metrics export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// HTTP port for the exporter (0 to disable).
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

/// Full settings file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Clock offset estimation.
    #[serde(default)]
    pub clock: ClockSettings,
    /// Capture pacing and timeouts.
    #[serde(default)]
    pub capture: CaptureSettings,
    /// Metrics export.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl Settings {
    /// Loads and validates settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let settings: Settings =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock.offset_samples == 0 {
            return Err(ConfigError::InvalidOffsetSamples);
        }
        let capture = &self.capture;
        if !(capture.delay_tolerance_ms.is_finite() && capture.delay_tolerance_ms >= 0.0) {
            return Err(ConfigError::InvalidDelayTolerance);
        }
        if !(capture.timeout_factor.is_finite() && capture.timeout_factor > 0.0)
            || capture.timeout_floor_ms == 0
        {
            return Err(ConfigError::InvalidImageTimeout);
        }
        if capture.stream_buffer_count == 0 {
            return Err(ConfigError::InvalidBufferCount);
        }
        self.name_template()?;
        Ok(())
    }

    /// Parsed default name template.
    pub fn name_template(&self) -> Result<NameTemplate, ConfigError> {
        self.capture
            .name_template
            .parse()
            .map_err(|e: crate::capture::ParseNameTemplateError| {
                ConfigError::InvalidNameTemplate(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.clock.offset_samples, 20);
        assert_eq!(settings.capture.delay_tolerance(), Duration::from_millis(1));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [capture]
            stream_buffer_count = 4
            "#,
        )
        .unwrap();
        assert_eq!(settings.capture.stream_buffer_count, 4);
        assert_eq!(settings.capture.timeout_floor_ms, 5000);
        assert_eq!(settings.metrics.port, 9090);
    }

    #[test]
    fn test_zero_samples_invalid() {
        let mut settings = Settings::default();
        settings.clock.offset_samples = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidOffsetSamples)
        ));
    }

    #[test]
    fn test_bad_template_invalid() {
        let mut settings = Settings::default();
        settings.capture.name_template = "{serial}_{lens}".to_owned();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidNameTemplate(_))
        ));
    }

    #[test]
    fn test_image_timeout() {
        let capture = CaptureSettings::default();
        // 5 periods at 0.5 fps = 10 s
        assert_eq!(capture.image_timeout(0.5), Duration::from_millis(10_000));
        // 5 periods at 30 fps is far below the floor
        assert_eq!(capture.image_timeout(30.0), Duration::from_millis(5000));
        assert_eq!(capture.image_timeout(0.0), Duration::from_millis(5000));
        assert_eq!(capture.image_timeout(f64::NAN), Duration::from_millis(5000));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Settings::from_file("/nonexistent/settings.toml"),
            Err(ConfigError::FileReadError(_))
        ));
    }
}
