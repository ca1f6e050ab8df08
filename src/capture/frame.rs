//! Grabbed frames and capture results.

use super::naming::{NameFields, NameTemplate};
use crate::device::RawImage;
use crate::session::SessionError;
use chrono::{DateTime, Local, TimeZone};
use std::fmt;

/// An image grabbed from a camera, still owned by the driver's buffer pool.
///
/// Must be handed back with [`crate::Session::release`] (or
/// [`crate::session::CameraHandle::release`]) once consumed.
pub struct GrabbedFrame {
    serial: String,
    image: RawImage,
    /// Capture time in epoch seconds.
    epoch_timestamp: f64,
}

impl GrabbedFrame {
    pub(crate) fn new(serial: String, image: RawImage, epoch_timestamp: f64) -> Self {
        Self {
            serial,
            image,
            epoch_timestamp,
        }
    }

    /// Serial of the camera that produced the frame.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Capture time in epoch seconds.
    #[inline]
    pub fn epoch_timestamp(&self) -> f64 {
        self.epoch_timestamp
    }

    /// Capture time as a local datetime.
    pub fn local_datetime(&self) -> Option<DateTime<Local>> {
        epoch_to_datetime(self.epoch_timestamp, &Local)
    }

    /// Device frame sequence number, restarting at 0 with each acquisition.
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.image.frame_id
    }

    /// Bits per pixel.
    #[inline]
    pub fn bits_per_pixel(&self) -> u32 {
        self.image.bits_per_pixel
    }

    /// Image width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width
    }

    /// Image height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height
    }

    /// Raw pixel data.
    pub fn data(&self) -> &[u8] {
        &self.image.data
    }

    pub(crate) fn into_raw(self) -> RawImage {
        self.image
    }
}

impl fmt::Debug for GrabbedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrabbedFrame")
            .field("serial", &self.serial)
            .field("frame_id", &self.image.frame_id)
            .field("epoch_timestamp", &self.epoch_timestamp)
            .field("width", &self.image.width)
            .field("height", &self.image.height)
            .field("pixel_bytes", &self.image.data.len())
            .finish()
    }
}

pub(crate) fn epoch_to_datetime<Tz: TimeZone>(seconds: f64, tz: &Tz) -> Option<DateTime<Tz>> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos).map(|utc| utc.with_timezone(tz))
}

/// Result of one grab: a frame, or nothing when the frame was
/// incomplete or the grab timed out.
#[derive(Debug)]
pub struct FrameResult {
    serial: String,
    frame: Option<GrabbedFrame>,
}

impl FrameResult {
    /// An empty result for `serial`.
    pub fn empty(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            frame: None,
        }
    }

    /// A result holding `frame`.
    pub fn grabbed(frame: GrabbedFrame) -> Self {
        Self {
            serial: frame.serial.clone(),
            frame: Some(frame),
        }
    }

    /// Serial of the camera the grab was issued to.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// The frame, if one arrived.
    pub fn frame(&self) -> Option<&GrabbedFrame> {
        self.frame.as_ref()
    }

    /// Returns true when no frame arrived.
    pub fn is_empty(&self) -> bool {
        self.frame.is_none()
    }

    /// Takes the frame out of the result.
    pub fn into_frame(self) -> Option<GrabbedFrame> {
        self.frame
    }
}

/// One burst slot of a capture, as shown to the capture sink.
#[derive(Debug)]
pub struct CaptureSlot<'a> {
    /// Zero-based image index.
    pub image: u64,
    /// Zero-based burst index within the image.
    pub burst: u32,
    /// Name counter of the image.
    pub counter: u64,
    /// One result per camera, in request order.
    pub frames: &'a [FrameResult],
}

impl CaptureSlot<'_> {
    /// Renders a file name per camera; `None` for empty results.
    pub fn names(&self, template: &NameTemplate) -> Vec<Option<String>> {
        self.names_in(template, &Local)
    }

    /// Like [`CaptureSlot::names`], rendering datetimes in `tz`.
    pub fn names_in<Tz>(&self, template: &NameTemplate, tz: &Tz) -> Vec<Option<String>>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        self.frames
            .iter()
            .enumerate()
            .map(|(index, result)| {
                let frame = result.frame()?;
                let datetime = epoch_to_datetime(frame.epoch_timestamp(), tz)?;
                Some(template.render(&NameFields {
                    serial: frame.serial(),
                    datetime,
                    cam: index + 1,
                    frame_id: frame.frame_id(),
                    counter: self.counter,
                }))
            })
            .collect()
    }
}

/// How one image of a capture ended.
#[derive(Debug)]
pub enum ImageOutcome {
    /// Every burst produced a frame on every camera.
    Complete,
    /// All bursts ran but some grabs came back empty.
    Partial {
        /// Number of empty results.
        empty: usize,
    },
    /// Frame ids went out of step; the remaining bursts were skipped.
    Aborted {
        /// The [`SessionError::Desync`] that ended the image.
        error: SessionError,
        /// Empty results in the bursts before the mismatch.
        empty: usize,
    },
}

impl ImageOutcome {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial { .. } => "partial",
            Self::Aborted { .. } => "aborted",
        }
    }

    /// Empty grab results recorded for the image.
    pub fn empty(&self) -> usize {
        match self {
            Self::Complete => 0,
            Self::Partial { empty } | Self::Aborted { empty, .. } => *empty,
        }
    }
}

/// Summary of one captured image.
#[derive(Debug)]
pub struct ImageRecord {
    /// Zero-based image index.
    pub index: u64,
    /// Name counter used for the image.
    pub counter: u64,
    /// Bursts that passed the frame id check.
    pub bursts: u32,
    /// Frames delivered to the sink.
    pub frames: usize,
    /// Outcome.
    pub outcome: ImageOutcome,
}

/// Summary of a whole capture call.
#[derive(Debug, Default)]
pub struct CaptureReport {
    /// One record per attempted image.
    pub images: Vec<ImageRecord>,
    /// Counter value for the next capture.
    pub next_counter: u64,
    /// Set when the stop signal ended the capture early.
    pub stopped: bool,
}

impl CaptureReport {
    /// Total frames delivered.
    pub fn frames(&self) -> usize {
        self.images.iter().map(|image| image.frames).sum()
    }

    /// Total empty grab results.
    pub fn empty_frames(&self) -> usize {
        self.images
            .iter()
            .map(|image| image.outcome.empty())
            .sum()
    }

    /// Number of images aborted by a frame id mismatch.
    pub fn aborted(&self) -> usize {
        self.images
            .iter()
            .filter(|image| matches!(image.outcome, ImageOutcome::Aborted { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(serial: &str, frame_id: u64, epoch: f64) -> GrabbedFrame {
        GrabbedFrame::new(
            serial.to_owned(),
            RawImage {
                buffer_id: 1,
                data: vec![0; 4],
                width: 2,
                height: 2,
                bits_per_pixel: 8,
                frame_id,
                timestamp_ns: 0,
                incomplete: false,
            },
            epoch,
        )
    }

    #[test]
    fn test_frame_result_accessors() {
        let result = FrameResult::grabbed(frame("A", 3, 10.5));
        assert_eq!(result.serial(), "A");
        assert!(!result.is_empty());
        assert_eq!(result.frame().unwrap().frame_id(), 3);

        let empty = FrameResult::empty("B");
        assert!(empty.is_empty());
        assert!(empty.into_frame().is_none());
    }

    #[test]
    fn test_epoch_to_datetime_keeps_fraction() {
        let dt = epoch_to_datetime(1_700_000_000.25, &Utc).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_slot_names_skip_empty_results() {
        let frames = vec![FrameResult::grabbed(frame("A", 0, 0.0)), FrameResult::empty("B")];
        let slot = CaptureSlot {
            image: 0,
            burst: 0,
            counter: 7,
            frames: &frames,
        };
        let template: NameTemplate = "{serial}_{cam}_{frameid}_{counter}".parse().unwrap();

        let names = slot.names_in(&template, &Utc);
        assert_eq!(
            names,
            vec![Some("SERIAL_A_CAM_1_FRAMEID_0_COUNTER_7".to_owned()), None]
        );
    }

    #[test]
    fn test_report_totals() {
        let report = CaptureReport {
            images: vec![
                ImageRecord {
                    index: 0,
                    counter: 0,
                    bursts: 1,
                    frames: 2,
                    outcome: ImageOutcome::Complete,
                },
                ImageRecord {
                    index: 1,
                    counter: 1,
                    bursts: 1,
                    frames: 1,
                    outcome: ImageOutcome::Partial { empty: 1 },
                },
                ImageRecord {
                    index: 2,
                    counter: 2,
                    bursts: 1,
                    frames: 1,
                    outcome: ImageOutcome::Aborted {
                        error: SessionError::Desync {
                            image: 2,
                            burst: 1,
                            frame_ids: vec![("A".to_owned(), 1), ("B".to_owned(), 0)],
                        },
                        empty: 1,
                    },
                },
            ],
            next_counter: 3,
            stopped: false,
        };
        assert_eq!(report.frames(), 4);
        assert_eq!(report.empty_frames(), 2);
        assert_eq!(report.aborted(), 1);
    }
}
