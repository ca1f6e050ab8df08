//! Synchronized capture across a camera group.
//!
//! This module provides the capture request and result types, the
//! controller that drives start/grab/release across cameras with frame
//! id alignment checks, and file name templating for captured frames.
//! Encoding frames to image files is left to the caller's sink.

mod controller;
mod frame;
mod naming;
mod request;

pub use controller::{CaptureController, CaptureOptions, StopSignal};
pub use frame::{
    CaptureReport, CaptureSlot, FrameResult, GrabbedFrame, ImageOutcome, ImageRecord,
};
pub use naming::{NameFields, NameTemplate, ParseNameTemplateError, DEFAULT_TEMPLATE};
pub use request::{CaptureRequest, CaptureRequestBuilder, ImageCount};
