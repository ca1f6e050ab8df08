//! Configuration: per-camera setup documents and session settings.

mod apply;
mod document;
mod settings;

pub use apply::apply;
pub use document::{FeatureAction, FeatureCommand, SetupDocument};
pub use settings::{CaptureSettings, ClockSettings, ConfigError, MetricsSettings, Settings};
