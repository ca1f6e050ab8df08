//! Camera session management.
//!
//! A [`Session`] binds every camera the device system reports into a
//! [`CameraRegistry`], keeps the registry current through hot-plug
//! events, and drives each [`CameraHandle`] through its
//! `Found -> Initialized -> Streaming` lifecycle. Feature access goes
//! through a [`CommandGateway`], and each initialized camera carries a
//! median-estimated offset between its clock and the wall clock.

mod cleanup;
mod clock;
mod error;
mod gateway;
mod handle;
mod lifecycle;
mod manager;
mod registry;

pub use cleanup::CleanupSteps;
pub use clock::{
    estimate_offset, median, SystemClock, TimestampLatch, WallClock, DEFAULT_OFFSET_SAMPLES,
};
pub use error::SessionError;
pub use gateway::{execute as execute_command, CommandGateway};
pub use handle::CameraHandle;
pub use lifecycle::CameraState;
pub use manager::{CameraStatus, Session};
pub use registry::{CameraEntry, CameraRegistry};
