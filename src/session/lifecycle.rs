//! Camera lifecycle state machine.
//!
//! ```text
//! Found --initialize--> Initialized --start_acquisition--> Streaming
//!   ^                       |   ^                              |
//!   +-----deinitialize------+   +-------end_acquisition--------+
//! ```
//!
//! Transitions attempted from the wrong state fail with
//! [`SessionError::InvalidState`] and leave the state unchanged.

use super::clock;
use super::handle::CameraHandle;
use super::SessionError;
use serde::Serialize;
use std::fmt;

/// Lifecycle state of a bound camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CameraState {
    /// Bound but not initialized.
    Found,
    /// Initialized, clock offset known.
    Initialized,
    /// Acquiring images.
    Streaming,
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Found => "found",
            Self::Initialized => "initialized",
            Self::Streaming => "streaming",
        })
    }
}

impl CameraHandle {
    /// Fails with `NotConnected` when the device has gone away.
    pub fn validate_found(&self) -> Result<(), SessionError> {
        if self.device().is_valid() {
            Ok(())
        } else {
            Err(SessionError::NotConnected {
                serial: self.serial().to_owned(),
            })
        }
    }

    /// Requires the camera to be initialized or streaming.
    pub fn validate_initialized(&self) -> Result<(), SessionError> {
        self.validate_found()?;
        if self.state() >= CameraState::Initialized {
            Ok(())
        } else {
            Err(self.invalid_state(CameraState::Initialized))
        }
    }

    /// Requires the camera to be streaming.
    pub fn validate_streaming(&self) -> Result<(), SessionError> {
        self.validate_found()?;
        self.require(CameraState::Streaming)
    }

    /// Initializes the device and estimates its clock offset.
    ///
    /// Only legal from `Found`. If the offset cannot be estimated the
    /// device is de-initialized again and the camera stays `Found`.
    pub fn initialize(&mut self) -> Result<f64, SessionError> {
        self.validate_found()?;
        self.require(CameraState::Found)?;

        let serial = self.serial().to_owned();
        self.device_mut()
            .init()
            .map_err(|e| SessionError::device(&serial, e))?;

        match self.estimate_offset() {
            Ok(offset) => {
                self.set_state(CameraState::Initialized);
                self.set_clock_offset(Some(offset));
                tracing::info!(serial = %serial, offset, "Camera initialized");
                Ok(offset)
            }
            Err(e) => {
                if let Err(deinit) = self.device_mut().deinit() {
                    tracing::warn!(serial = %serial, error = %deinit, "De-init after failed offset estimate failed");
                }
                Err(e)
            }
        }
    }

    /// Initialized -> Streaming.
    pub fn start_acquisition(&mut self) -> Result<(), SessionError> {
        self.validate_found()?;
        self.require(CameraState::Initialized)?;

        let serial = self.serial().to_owned();
        self.device_mut()
            .begin_acquisition()
            .map_err(|e| SessionError::device(&serial, e))?;
        self.set_state(CameraState::Streaming);
        tracing::info!(serial = %serial, "Acquisition started");
        Ok(())
    }

    /// Streaming -> Initialized.
    pub fn end_acquisition(&mut self) -> Result<(), SessionError> {
        self.validate_streaming()?;

        let serial = self.serial().to_owned();
        self.device_mut()
            .end_acquisition()
            .map_err(|e| SessionError::device(&serial, e))?;
        self.set_state(CameraState::Initialized);
        tracing::info!(serial = %serial, "Acquisition ended");
        Ok(())
    }

    /// Initialized -> Found.
    pub fn deinitialize(&mut self) -> Result<(), SessionError> {
        self.validate_found()?;
        self.require(CameraState::Initialized)?;

        let serial = self.serial().to_owned();
        self.device_mut()
            .deinit()
            .map_err(|e| SessionError::device(&serial, e))?;
        self.set_state(CameraState::Found);
        self.set_clock_offset(None);
        tracing::info!(serial = %serial, "Camera de-initialized");
        Ok(())
    }

    /// Re-estimates the clock offset of an initialized camera.
    pub fn refresh_clock_offset(&mut self) -> Result<f64, SessionError> {
        self.validate_initialized()?;
        let offset = self.estimate_offset()?;
        self.set_clock_offset(Some(offset));
        tracing::debug!(serial = %self.serial(), offset, "Clock offset refreshed");
        Ok(offset)
    }

    fn estimate_offset(&mut self) -> Result<f64, SessionError> {
        let clock = self.wall_clock();
        let samples = self.offset_samples();
        clock::estimate_offset(self, clock.as_ref(), samples)
    }

    fn require(&self, required: CameraState) -> Result<(), SessionError> {
        if self.state() == required {
            Ok(())
        } else {
            Err(self.invalid_state(required))
        }
    }

    fn invalid_state(&self, required: CameraState) -> SessionError {
        SessionError::InvalidState {
            serial: self.serial().to_owned(),
            required,
            actual: self.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceSystem, SimCameraSpec, SimEvent, SimRig};
    use crate::session::{SystemClock, WallClock};
    use std::sync::Arc;

    fn handle(rig: &SimRig, serial: &str) -> CameraHandle {
        let device = rig
            .system()
            .enumerate()
            .unwrap()
            .into_iter()
            .find(|device| device.serial() == serial)
            .unwrap();
        CameraHandle::new(device, Arc::new(SystemClock), 5)
    }

    fn assert_invalid(result: Result<(), SessionError>, required: CameraState) {
        match result {
            Err(SessionError::InvalidState { required: r, .. }) => assert_eq!(r, required),
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn test_legal_transitions() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let mut cam = handle(&rig, "A");
        assert_eq!(cam.state(), CameraState::Found);

        cam.initialize().unwrap();
        assert_eq!(cam.state(), CameraState::Initialized);
        assert!(cam.clock_offset().is_some());

        cam.start_acquisition().unwrap();
        assert_eq!(cam.state(), CameraState::Streaming);
        cam.end_acquisition().unwrap();
        assert_eq!(cam.state(), CameraState::Initialized);
        cam.deinitialize().unwrap();
        assert_eq!(cam.state(), CameraState::Found);
        assert!(cam.clock_offset().is_none());

        assert_eq!(
            rig.events("A"),
            vec![
                SimEvent::Init,
                SimEvent::BeginAcquisition,
                SimEvent::EndAcquisition,
                SimEvent::Deinit
            ]
        );
    }

    #[test]
    fn test_illegal_transitions_leave_state_unchanged() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let mut cam = handle(&rig, "A");

        // From Found
        assert_invalid(cam.start_acquisition(), CameraState::Initialized);
        assert_invalid(cam.end_acquisition(), CameraState::Streaming);
        assert_invalid(cam.deinitialize(), CameraState::Initialized);
        assert_eq!(cam.state(), CameraState::Found);

        // From Initialized
        cam.initialize().unwrap();
        assert_invalid(cam.initialize().map(|_| ()), CameraState::Found);
        assert_invalid(cam.end_acquisition(), CameraState::Streaming);
        assert_eq!(cam.state(), CameraState::Initialized);

        // From Streaming
        cam.start_acquisition().unwrap();
        assert_invalid(cam.initialize().map(|_| ()), CameraState::Found);
        assert_invalid(cam.start_acquisition(), CameraState::Initialized);
        assert_invalid(cam.deinitialize(), CameraState::Initialized);
        assert_eq!(cam.state(), CameraState::Streaming);
        assert!(rig.is_streaming("A"));
    }

    #[test]
    fn test_guards() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let mut cam = handle(&rig, "A");

        assert!(cam.validate_found().is_ok());
        assert!(cam.validate_initialized().is_err());
        cam.initialize().unwrap();
        assert!(cam.validate_initialized().is_ok());
        assert!(cam.validate_streaming().is_err());
        cam.start_acquisition().unwrap();
        assert!(cam.validate_initialized().is_ok());
        assert!(cam.validate_streaming().is_ok());
    }

    #[test]
    fn test_unplugged_camera_is_not_connected() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let mut cam = handle(&rig, "A");
        cam.initialize().unwrap();

        rig.detach("A");
        assert!(matches!(
            cam.start_acquisition(),
            Err(SessionError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_refresh_requires_initialized() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let mut cam = handle(&rig, "A");
        assert!(cam.refresh_clock_offset().is_err());

        let first = cam.initialize().unwrap();
        let second = cam.refresh_clock_offset().unwrap();
        // Same device clock and host clock: offsets agree closely
        assert!((first - second).abs() < 0.1);
    }

    #[test]
    fn test_offset_maps_device_uptime_to_epoch() {
        let rig = SimRig::with_cameras([
            SimCameraSpec::new("A").with_uptime(std::time::Duration::from_secs(1000))
        ]);
        let mut cam = handle(&rig, "A");
        let offset = cam.initialize().unwrap();

        let now = SystemClock.now_seconds();
        assert!((offset + 1000.0 - now).abs() < 1.0);
    }
}
