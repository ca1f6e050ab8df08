//! Prometheus metrics exporter for camera sessions.
//!
//! # Metrics Exposed
//!
//! ## Session Metrics
//! - `multicam_connected_cameras` - Cameras currently attached
//! - `multicam_clock_offset_seconds{serial}` - Wall clock minus camera clock
//!
//! ## Capture Metrics
//! - `multicam_frames_total` - Frames delivered to capture sinks
//! - `multicam_empty_frames_total` - Grabs that came back empty
//! - `multicam_images_total{outcome}` - Images by outcome (complete, partial, aborted)
//! - `multicam_desync_total` - Images aborted on a frame id mismatch
//!
//! With the `metrics` feature, `/metrics` serves these in text format and
//! `/health` returns the last observed camera listing as JSON (503 when no
//! camera is bound or one has been unplugged).
//!
//! # Example
//!
//! ```no_run
//! use multicam_sync::metrics::MetricsRegistry;
//! use multicam_sync::capture::CaptureReport;
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! registry.observe_report(&CaptureReport::default());
//! println!("{}", registry.encode().expect("Failed to encode"));
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry};
#[cfg(feature = "metrics")]
pub use server::{HealthReport, MetricsServer, MetricsServerConfig, ServerError};
