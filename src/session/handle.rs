//! Per-camera handle owning the native device.

use super::cleanup::CleanupSteps;
use super::clock::{TimestampLatch, WallClock};
use super::gateway::{self, CommandGateway};
use super::lifecycle::CameraState;
use super::SessionError;
use crate::capture::{FrameResult, GrabbedFrame};
use crate::device::{AccessMode, Device, FeatureValue, Method};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One physical camera bound into the session.
///
/// The handle exclusively owns the native device. Dropping a handle that
/// is not `Found` ends acquisition and de-initializes first, logging but
/// otherwise ignoring failures.
pub struct CameraHandle {
    serial: String,
    device: Box<dyn Device>,
    state: CameraState,
    clock_offset: Option<f64>,
    clock: Arc<dyn WallClock>,
    offset_samples: usize,
}

impl CameraHandle {
    /// Binds `device` in state `Found`.
    pub fn new(device: Box<dyn Device>, clock: Arc<dyn WallClock>, offset_samples: usize) -> Self {
        Self {
            serial: device.serial().to_owned(),
            device,
            state: CameraState::Found,
            clock_offset: None,
            clock,
            offset_samples,
        }
    }

    /// Camera serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> CameraState {
        self.state
    }

    /// `epoch - device` clock offset in seconds, known once initialized.
    #[inline]
    pub fn clock_offset(&self) -> Option<f64> {
        self.clock_offset
    }

    /// Grabs the next image, waiting up to `timeout`.
    ///
    /// Incomplete images are released straight away and reported as an
    /// empty result. A timeout is returned as [`SessionError::Timeout`].
    pub fn grab(&mut self, timeout: Duration) -> Result<FrameResult, SessionError> {
        self.validate_streaming()?;

        let image = self
            .device
            .next_image(timeout)
            .map_err(|e| SessionError::device(&self.serial, e))?;

        if image.incomplete {
            tracing::warn!(serial = %self.serial, frame_id = image.frame_id, "Image incomplete");
            self.device
                .release_image(image)
                .map_err(|e| SessionError::device(&self.serial, e))?;
            return Ok(FrameResult::empty(self.serial.clone()));
        }

        let epoch = self.clock_offset.unwrap_or_default() + image.timestamp_ns as f64 / 1e9;
        tracing::trace!(serial = %self.serial, frame_id = image.frame_id, epoch, "Image grabbed");
        Ok(FrameResult::grabbed(GrabbedFrame::new(
            self.serial.clone(),
            image,
            epoch,
        )))
    }

    /// Hands a grabbed frame back to the driver's buffer pool.
    ///
    /// A frame grabbed by another camera is rejected with
    /// [`SessionError::MisdirectedRelease`], which still owns the frame.
    pub fn release(&mut self, frame: GrabbedFrame) -> Result<(), SessionError> {
        if frame.serial() != self.serial {
            return Err(SessionError::MisdirectedRelease {
                target: self.serial.clone(),
                frame: Box::new(frame),
            });
        }
        self.device
            .release_image(frame.into_raw())
            .map_err(|e| SessionError::device(&self.serial, e))
    }

    /// Drives the camera back to `Found`, ignoring guards.
    ///
    /// Returns the number of teardown steps that failed.
    pub fn force_found(&mut self) -> usize {
        if self.state == CameraState::Found {
            return 0;
        }
        if !self.device.is_valid() {
            tracing::debug!(serial = %self.serial, "Device gone, skipping teardown");
            self.state = CameraState::Found;
            self.clock_offset = None;
            return 0;
        }

        let mut steps = CleanupSteps::<Self, SessionError>::new(self.serial.clone());
        if self.state == CameraState::Streaming {
            steps = steps.step("end acquisition", |cam: &mut Self| {
                cam.device
                    .end_acquisition()
                    .map_err(|e| SessionError::device(&cam.serial, e))
            });
        }
        steps = steps.step("de-initialize", |cam: &mut Self| {
            cam.device
                .deinit()
                .map_err(|e| SessionError::device(&cam.serial, e))
        });

        let failures = steps.run(self);
        self.state = CameraState::Found;
        self.clock_offset = None;
        failures
    }

    pub(super) fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub(super) fn device_mut(&mut self) -> &mut dyn Device {
        self.device.as_mut()
    }

    pub(super) fn set_state(&mut self, state: CameraState) {
        self.state = state;
    }

    pub(super) fn set_clock_offset(&mut self, offset: Option<f64>) {
        self.clock_offset = offset;
    }

    pub(super) fn wall_clock(&self) -> Arc<dyn WallClock> {
        Arc::clone(&self.clock)
    }

    pub(super) fn offset_samples(&self) -> usize {
        self.offset_samples
    }
}

impl CommandGateway for CameraHandle {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn execute(
        &mut self,
        path: &str,
        method: Method,
        access: Option<AccessMode>,
        argument: Option<FeatureValue>,
    ) -> Result<Option<FeatureValue>, SessionError> {
        gateway::execute(self.device.as_mut(), path, method, access, argument)
    }
}

impl TimestampLatch for CameraHandle {
    fn latch(&mut self) -> Result<(), SessionError> {
        CommandGateway::execute(self, "TimestampLatch", Method::Execute, None, None).map(drop)
    }

    fn latched_nanos(&mut self) -> Result<i64, SessionError> {
        let value = CommandGateway::execute(self, "TimestampLatchValue", Method::GetValue, None, None)?;
        match value {
            Some(FeatureValue::Integer(nanos)) => Ok(nanos),
            other => Err(SessionError::device(
                &self.serial,
                crate::device::DeviceError::TypeMismatch {
                    feature: "TimestampLatchValue".to_owned(),
                    expected: "integer",
                    got: other.as_ref().map_or("nothing", FeatureValue::type_name),
                },
            )),
        }
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        let failures = self.force_found();
        tracing::debug!(serial = %self.serial, failures, "Camera handle released");
    }
}

impl fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraHandle")
            .field("serial", &self.serial)
            .field("state", &self.state)
            .field("clock_offset", &self.clock_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceSystem, GrabFault, SimCameraSpec, SimEvent, SimRig};
    use crate::session::SystemClock;

    fn handle(rig: &SimRig) -> CameraHandle {
        let device = rig.system().enumerate().unwrap().pop().unwrap();
        CameraHandle::new(device, Arc::new(SystemClock), 3)
    }

    #[test]
    fn test_grab_requires_streaming() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let mut cam = handle(&rig);
        cam.initialize().unwrap();
        assert!(matches!(
            cam.grab(Duration::from_millis(10)),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_grab_timestamps_in_epoch_time() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let mut cam = handle(&rig);
        cam.initialize().unwrap();
        cam.start_acquisition().unwrap();

        let result = cam.grab(Duration::from_millis(10)).unwrap();
        let frame = result.into_frame().unwrap();
        let now = SystemClock.now_seconds();
        assert!((frame.epoch_timestamp() - now).abs() < 1.0);
        assert_eq!(frame.frame_id(), 0);
        assert_eq!(frame.bits_per_pixel(), 8);

        cam.release(frame).unwrap();
        assert_eq!(rig.outstanding_buffers("A"), 0);
    }

    #[test]
    fn test_incomplete_image_is_released_and_empty() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        rig.inject_fault("A", 1, GrabFault::Incomplete);
        let mut cam = handle(&rig);
        cam.initialize().unwrap();
        cam.start_acquisition().unwrap();

        let result = cam.grab(Duration::from_millis(10)).unwrap();
        assert!(result.is_empty());
        assert_eq!(rig.outstanding_buffers("A"), 0);
    }

    #[test]
    fn test_timeout_maps_to_session_timeout() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        rig.inject_fault("A", 1, GrabFault::Timeout);
        let mut cam = handle(&rig);
        cam.initialize().unwrap();
        cam.start_acquisition().unwrap();

        let err = cam.grab(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, SessionError::Timeout { timeout_ms: 20, .. }));
    }

    #[test]
    fn test_drop_while_streaming_stops_and_deinits() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let mut cam = handle(&rig);
        cam.initialize().unwrap();
        cam.start_acquisition().unwrap();
        drop(cam);

        assert!(!rig.is_streaming("A"));
        assert!(!rig.is_initialized("A"));
        let events = rig.events("A");
        assert_eq!(
            &events[events.len() - 2..],
            &[SimEvent::EndAcquisition, SimEvent::Deinit]
        );
    }

    #[test]
    fn test_force_found_runs_every_step() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let mut cam = handle(&rig);
        cam.initialize().unwrap();
        cam.start_acquisition().unwrap();

        assert_eq!(cam.force_found(), 0);
        assert_eq!(cam.state(), CameraState::Found);
        assert_eq!(cam.force_found(), 0);
    }

    #[test]
    fn test_release_to_wrong_camera_rejected() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A"), SimCameraSpec::new("B")]);
        let mut devices = rig.system().enumerate().unwrap();
        let mut b = CameraHandle::new(devices.pop().unwrap(), Arc::new(SystemClock), 3);
        let mut a = CameraHandle::new(devices.pop().unwrap(), Arc::new(SystemClock), 3);
        a.initialize().unwrap();
        a.start_acquisition().unwrap();

        let frame = a.grab(Duration::from_millis(10)).unwrap().into_frame().unwrap();
        let err = b.release(frame).unwrap_err();
        assert!(matches!(err, SessionError::MisdirectedRelease { ref target, .. } if target == "B"));
        assert_eq!(rig.outstanding_buffers("A"), 1);

        let frame = err.into_unreleased_frame().unwrap();
        a.release(frame).unwrap();
        assert_eq!(rig.outstanding_buffers("A"), 0);
    }
}
