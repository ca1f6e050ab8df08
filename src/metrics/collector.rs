//! Metrics collection and registry.

use crate::capture::{CaptureReport, ImageOutcome, ImageRecord};
use crate::session::{CameraStatus, SessionError};
use parking_lot::Mutex;
use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Prometheus metrics registry for camera sessions.
pub struct MetricsRegistry {
    registry: Registry,

    // Session metrics
    connected_cameras: IntGauge,
    clock_offset: GaugeVec,
    cameras: Mutex<Vec<CameraStatus>>,

    // Capture metrics
    frames_total: IntCounter,
    empty_frames_total: IntCounter,
    images_total: IntCounterVec,
    desync_total: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all session metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let connected_cameras = IntGauge::new(
            "multicam_connected_cameras",
            "Number of cameras currently attached",
        )?;
        let clock_offset = GaugeVec::new(
            Opts::new(
                "multicam_clock_offset_seconds",
                "Offset between wall clock and camera clock",
            ),
            &["serial"],
        )?;

        let frames_total = IntCounter::new(
            "multicam_frames_total",
            "Frames delivered to capture sinks",
        )?;
        let empty_frames_total = IntCounter::new(
            "multicam_empty_frames_total",
            "Grabs that timed out or returned an incomplete image",
        )?;
        let images_total = IntCounterVec::new(
            Opts::new("multicam_images_total", "Captured images by outcome"),
            &["outcome"],
        )?;
        let desync_total = IntCounter::new(
            "multicam_desync_total",
            "Images aborted because frame ids went out of step",
        )?;

        registry.register(Box::new(connected_cameras.clone()))?;
        registry.register(Box::new(clock_offset.clone()))?;
        registry.register(Box::new(frames_total.clone()))?;
        registry.register(Box::new(empty_frames_total.clone()))?;
        registry.register(Box::new(images_total.clone()))?;
        registry.register(Box::new(desync_total.clone()))?;

        Ok(Self {
            registry,
            connected_cameras,
            clock_offset,
            cameras: Mutex::new(Vec::new()),
            frames_total,
            empty_frames_total,
            images_total,
            desync_total,
        })
    }

    /// Updates the session gauges from a camera listing and keeps the
    /// listing for [`MetricsRegistry::cameras`].
    pub fn observe_cameras(&self, cameras: &[CameraStatus]) {
        let connected = cameras.iter().filter(|c| c.connected).count();
        self.connected_cameras.set(connected as i64);

        self.clock_offset.reset();
        for camera in cameras {
            if let Some(offset) = camera.clock_offset {
                self.clock_offset
                    .with_label_values(&[camera.serial.as_str()])
                    .set(offset);
            }
        }
        *self.cameras.lock() = cameras.to_vec();
    }

    /// Last observed camera listing.
    pub fn cameras(&self) -> Vec<CameraStatus> {
        self.cameras.lock().clone()
    }

    /// Adds one captured image to the counters.
    pub fn observe_image(&self, image: &ImageRecord) {
        self.frames_total.inc_by(image.frames as u64);
        self.images_total
            .with_label_values(&[image.outcome.label()])
            .inc();
        self.empty_frames_total
            .inc_by(image.outcome.empty() as u64);
        if let ImageOutcome::Aborted {
            error: SessionError::Desync { .. },
            ..
        } = &image.outcome
        {
            self.desync_total.inc();
        }
    }

    /// Adds every image of a finished capture to the counters.
    pub fn observe_report(&self, report: &CaptureReport) {
        report.images.iter().for_each(|image| self.observe_image(image));
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CameraState;

    fn record(index: u64, frames: usize, outcome: ImageOutcome) -> ImageRecord {
        ImageRecord {
            index,
            counter: index,
            bursts: 1,
            frames,
            outcome,
        }
    }

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_observe_cameras() {
        let registry = MetricsRegistry::new().unwrap();
        registry.observe_cameras(&[
            CameraStatus {
                serial: "A".to_owned(),
                state: CameraState::Initialized,
                clock_offset: Some(1.5),
                connected: true,
            },
            CameraStatus {
                serial: "B".to_owned(),
                state: CameraState::Found,
                clock_offset: None,
                connected: false,
            },
        ]);

        let output = registry.encode().unwrap();
        assert!(output.contains("multicam_connected_cameras 1"));
        assert!(output.contains("multicam_clock_offset_seconds{serial=\"A\"} 1.5"));
        assert!(!output.contains("serial=\"B\""));
        assert_eq!(registry.cameras().len(), 2);
        assert_eq!(registry.cameras()[0].serial, "A");
    }

    #[test]
    fn test_images_counted_as_they_arrive() {
        let registry = MetricsRegistry::new().unwrap();
        registry.observe_image(&record(0, 2, ImageOutcome::Complete));
        assert!(registry.encode().unwrap().contains("multicam_frames_total 2"));

        registry.observe_image(&record(1, 1, ImageOutcome::Partial { empty: 1 }));
        let output = registry.encode().unwrap();
        assert!(output.contains("multicam_frames_total 3"));
        assert!(output.contains("multicam_empty_frames_total 1"));
    }

    #[test]
    fn test_observe_report() {
        let registry = MetricsRegistry::new().unwrap();
        let report = CaptureReport {
            images: vec![
                record(0, 2, ImageOutcome::Complete),
                record(1, 1, ImageOutcome::Partial { empty: 1 }),
                record(
                    2,
                    0,
                    ImageOutcome::Aborted {
                        error: SessionError::Desync {
                            image: 2,
                            burst: 1,
                            frame_ids: vec![("A".to_owned(), 3), ("B".to_owned(), 4)],
                        },
                        empty: 1,
                    },
                ),
            ],
            next_counter: 3,
            stopped: false,
        };

        registry.observe_report(&report);

        let output = registry.encode().unwrap();
        assert!(output.contains("multicam_frames_total 3"));
        assert!(output.contains("multicam_empty_frames_total 2"));
        assert!(output.contains("multicam_desync_total 1"));
        assert!(output.contains("multicam_images_total{outcome=\"partial\"} 1"));
        assert!(output.contains("multicam_images_total{outcome=\"aborted\"} 1"));
    }

    #[test]
    fn test_metrics_encode() {
        let registry = MetricsRegistry::new().unwrap();
        let output = registry.encode().unwrap();

        assert!(output.contains("multicam_connected_cameras"));
        assert!(output.contains("multicam_frames_total"));
        assert!(output.contains("multicam_desync_total"));
    }
}
