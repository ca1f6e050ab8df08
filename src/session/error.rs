//! Session error taxonomy.

use super::lifecycle::CameraState;
use crate::capture::GrabbedFrame;
use crate::device::{AccessMode, DeviceError};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the session core.
///
/// Messages are meant to be shown to an operator as-is.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("camera {serial} is not connected")]
    NotConnected { serial: String },

    #[error("camera {serial} must be {required} but is {actual}")]
    InvalidState {
        serial: String,
        required: CameraState,
        actual: CameraState,
    },

    #[error("feature {path} has access mode {actual}, expected {required}")]
    AccessMode {
        path: String,
        required: AccessMode,
        actual: AccessMode,
    },

    #[error("unsupported argument: {0}")]
    UnsupportedArgument(String),

    #[error("malformed configuration: {0}")]
    MalformedConfig(String),

    #[error("camera {serial} timed out after {timeout_ms} ms")]
    Timeout { serial: String, timeout_ms: u64 },

    #[error("frame ids out of step on image {image}, burst {burst}: {}", FrameIds(.frame_ids))]
    Desync {
        image: u64,
        burst: u32,
        frame_ids: Vec<(String, u64)>,
    },

    #[error("camera {serial} has no feature {path}")]
    UnknownFeature { serial: String, path: String },

    #[error("camera {serial}: {source}")]
    Device {
        serial: String,
        #[source]
        source: DeviceError,
    },

    #[error("device system: {0}")]
    System(#[source] DeviceError),

    #[error("{} camera(s) failed: {}", .0.len(), Joined(.0))]
    Acquisition(Vec<SessionError>),

    #[error("failed to read {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The frame is handed back; see [`SessionError::into_unreleased_frame`].
    #[error("frame from camera {} released to camera {target}", .frame.serial())]
    MisdirectedRelease {
        target: String,
        frame: Box<GrabbedFrame>,
    },
}

impl SessionError {
    /// Wraps an SDK error for the given camera.
    ///
    /// Driver timeouts become [`SessionError::Timeout`] so callers can
    /// tell them apart from hard failures.
    pub fn device(serial: &str, source: DeviceError) -> Self {
        match source {
            DeviceError::Timeout(timeout) => Self::Timeout {
                serial: serial.to_owned(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            source => Self::Device {
                serial: serial.to_owned(),
                source,
            },
        }
    }

    /// Takes back a frame whose release was rejected, so it can still be
    /// returned to the camera that owns it.
    pub fn into_unreleased_frame(self) -> Option<GrabbedFrame> {
        match self {
            Self::MisdirectedRelease { frame, .. } => Some(*frame),
            _ => None,
        }
    }

    /// Returns true for grab timeouts, which capture tolerates per slot.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

struct FrameIds<'a>(&'a [(String, u64)]);

impl fmt::Display for FrameIds<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (serial, frame_id)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{serial}={frame_id}")?;
        }
        Ok(())
    }
}

struct Joined<'a>(&'a [SessionError]);

impl fmt::Display for Joined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}
