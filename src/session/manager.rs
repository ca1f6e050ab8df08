//! The session: device system, registry and the operations on top.

use super::clock::{SystemClock, WallClock};
use super::handle::CameraHandle;
use super::lifecycle::CameraState;
use super::registry::{CameraEntry, CameraRegistry};
use super::{CommandGateway, SessionError};
use crate::capture::{
    CaptureController, CaptureOptions, CaptureReport, CaptureRequest, CaptureSlot, FrameResult,
    GrabbedFrame, ImageRecord, StopSignal,
};
use crate::config::{self, Settings, SetupDocument};
use crate::device::{AccessMode, DeviceError, DeviceSystem, FeatureValue, Method};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of one bound camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStatus {
    /// Serial number.
    pub serial: String,
    /// Lifecycle state.
    pub state: CameraState,
    /// Clock offset in seconds, once initialized.
    pub clock_offset: Option<f64>,
    /// False once unplugged.
    pub connected: bool,
}

/// A multi-camera session.
///
/// Owns the device system for its whole lifetime: opening a session
/// binds every attached camera and registers for hot-plug events;
/// [`Session::shutdown`] (or drop) returns every camera to `Found`,
/// empties the registry and releases the system.
pub struct Session {
    system: Box<dyn DeviceSystem>,
    registry: Arc<CameraRegistry>,
    settings: Settings,
    stop: StopSignal,
    closed: bool,
}

impl Session {
    /// Opens a session using the system wall clock.
    pub fn open(system: Box<dyn DeviceSystem>, settings: Settings) -> Result<Self, SessionError> {
        Self::open_with_clock(system, settings, Arc::new(SystemClock))
    }

    /// Opens a session with an explicit wall clock.
    pub fn open_with_clock(
        mut system: Box<dyn DeviceSystem>,
        settings: Settings,
        clock: Arc<dyn WallClock>,
    ) -> Result<Self, SessionError> {
        settings
            .validate()
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;

        let registry = Arc::new(CameraRegistry::new(clock, settings.clock.offset_samples));
        for device in system.enumerate().map_err(SessionError::System)? {
            registry.on_arrival(device);
        }
        system
            .register_hotplug(registry.hotplug_handler())
            .map_err(SessionError::System)?;

        tracing::info!(cameras = registry.len(), "Session opened");
        Ok(Self {
            system,
            registry,
            settings,
            stop: StopSignal::new(),
            closed: false,
        })
    }

    /// The camera registry.
    pub fn registry(&self) -> &Arc<CameraRegistry> {
        &self.registry
    }

    /// Session settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stop signal checked by [`Session::capture`] between images.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Status of every bound camera, sorted by serial.
    pub fn cameras(&self) -> Vec<CameraStatus> {
        self.registry
            .entries()
            .iter()
            .map(|entry| {
                let cam = entry.lock();
                CameraStatus {
                    serial: entry.serial().to_owned(),
                    state: cam.state(),
                    clock_offset: cam.clock_offset(),
                    connected: entry.is_connected(),
                }
            })
            .collect()
    }

    /// Finds a bound, still attached camera.
    pub fn find(&self, serial: &str) -> Result<Arc<CameraEntry>, SessionError> {
        let entry = self.registry.lookup(serial)?;
        entry.lock().validate_found()?;
        Ok(entry)
    }

    /// Finds the camera named by a setup document's `serial`.
    pub fn find_by_config(&self, path: impl AsRef<Path>) -> Result<Arc<CameraEntry>, SessionError> {
        let path = path.as_ref();
        let doc = SetupDocument::from_file(path)?;
        let serial = doc.serial.ok_or_else(|| missing_serial(path))?;
        self.find(&serial)
    }

    /// Initializes a camera and estimates its clock offset.
    pub fn initialize(&self, serial: &str) -> Result<f64, SessionError> {
        self.with_camera(serial, CameraHandle::initialize)
    }

    /// De-initializes a camera.
    pub fn deinitialize(&self, serial: &str) -> Result<(), SessionError> {
        self.with_camera(serial, CameraHandle::deinitialize)
    }

    /// Starts acquisition on one camera.
    pub fn start_acquisition(&self, serial: &str) -> Result<(), SessionError> {
        self.with_camera(serial, CameraHandle::start_acquisition)
    }

    /// Ends acquisition on one camera.
    pub fn end_acquisition(&self, serial: &str) -> Result<(), SessionError> {
        self.with_camera(serial, CameraHandle::end_acquisition)
    }

    /// Re-estimates a camera's clock offset.
    pub fn refresh_clock_offset(&self, serial: &str) -> Result<f64, SessionError> {
        self.with_camera(serial, CameraHandle::refresh_clock_offset)
    }

    /// Runs a feature command on an initialized camera.
    pub fn feature_command(
        &self,
        serial: &str,
        path: &str,
        method: Method,
        access: Option<AccessMode>,
        argument: Option<FeatureValue>,
    ) -> Result<Option<FeatureValue>, SessionError> {
        self.with_camera(serial, |cam| {
            cam.validate_initialized()?;
            cam.execute(path, method, access, argument)
        })
    }

    /// Current gain.
    pub fn gain(&self, serial: &str) -> Result<f64, SessionError> {
        self.read_float(serial, "Gain")
    }

    /// Sets the gain.
    pub fn set_gain(&self, serial: &str, gain: f64) -> Result<(), SessionError> {
        self.write_float(serial, "Gain", gain)
    }

    /// Current exposure time in microseconds.
    pub fn exposure(&self, serial: &str) -> Result<f64, SessionError> {
        self.read_float(serial, "ExposureTime")
    }

    /// Sets the exposure time in microseconds.
    pub fn set_exposure(&self, serial: &str, exposure_us: f64) -> Result<(), SessionError> {
        self.write_float(serial, "ExposureTime", exposure_us)
    }

    /// Configured frame rate.
    pub fn frame_rate(&self, serial: &str) -> Result<f64, SessionError> {
        self.read_float(serial, "AcquisitionFrameRate")
    }

    /// Sets the frame rate.
    pub fn set_frame_rate(&self, serial: &str, frame_rate: f64) -> Result<(), SessionError> {
        self.write_float(serial, "AcquisitionFrameRate", frame_rate)
    }

    /// Grabs one image from a streaming camera.
    pub fn grab(&self, serial: &str, timeout: Duration) -> Result<FrameResult, SessionError> {
        self.with_camera(serial, |cam| cam.grab(timeout))
    }

    /// Hands a grabbed frame back to its camera.
    pub fn release(&self, frame: GrabbedFrame) -> Result<(), SessionError> {
        let entry = self.registry.lookup(frame.serial())?;
        let mut cam = entry.lock();
        cam.release(frame)
    }

    /// Sets up the camera named in a setup document file.
    ///
    /// Returns the camera's serial.
    pub fn setup(&self, path: impl AsRef<Path>) -> Result<String, SessionError> {
        let path = path.as_ref();
        let doc = SetupDocument::from_file(path)?;
        if doc.serial.is_none() {
            return Err(missing_serial(path));
        }
        self.setup_document(&doc)
    }

    /// Initializes the document's camera if needed, then applies its
    /// `init` commands in order.
    pub fn setup_document(&self, doc: &SetupDocument) -> Result<String, SessionError> {
        let serial = doc
            .serial
            .clone()
            .ok_or_else(|| SessionError::MalformedConfig("missing serial".to_owned()))?;

        self.with_camera(&serial, |cam| {
            match cam.state() {
                CameraState::Found => {
                    cam.initialize()?;
                }
                CameraState::Initialized => {
                    tracing::debug!(serial = %serial, "Camera already initialized");
                }
                CameraState::Streaming => {
                    return Err(SessionError::InvalidState {
                        serial: serial.clone(),
                        required: CameraState::Initialized,
                        actual: CameraState::Streaming,
                    });
                }
            }
            let applied = config::apply(cam, &doc.init)?;
            tracing::info!(serial = %serial, commands = applied, "Camera set up");
            Ok(())
        })?;
        Ok(serial)
    }

    /// Grab timeout for a camera, derived from its resulting frame rate.
    pub fn image_timeout(&self, serial: &str) -> Result<Duration, SessionError> {
        let fps = self.read_float(serial, "AcquisitionResultingFrameRate")?;
        let timeout = self.settings.capture.image_timeout(fps);
        tracing::info!(
            serial = %serial,
            fps,
            timeout_ms = timeout.as_millis() as u64,
            "Image timeout derived from effective frame rate"
        );
        Ok(timeout)
    }

    /// Grab timeout that suits every camera in `serials`.
    pub fn group_image_timeout(&self, serials: &[String]) -> Result<Duration, SessionError> {
        serials.iter().try_fold(Duration::ZERO, |longest, serial| {
            Ok(longest.max(self.image_timeout(serial)?))
        })
    }

    /// Copies exposure and frame rate from `reference` onto `serial`
    /// where they differ. Returns true if anything changed.
    pub fn sync_settings(&self, serial: &str, reference: &str) -> Result<bool, SessionError> {
        let mut changed = false;
        for path in ["ExposureTime", "AcquisitionFrameRate"] {
            let wanted = self.read_float(reference, path)?;
            let current = self.read_float(serial, path)?;
            if current != wanted {
                tracing::info!(
                    serial = %serial,
                    reference = %reference,
                    feature = path,
                    from = current,
                    to = wanted,
                    "Syncing setting to group"
                );
                self.write_float(serial, path, wanted)?;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Captures images from a camera group, calling `sink` once per burst
    /// slot. Cameras must be initialized.
    pub fn capture<F>(&self, request: &CaptureRequest, sink: F) -> Result<CaptureReport, SessionError>
    where
        F: FnMut(&CaptureSlot<'_>) -> Result<(), SessionError>,
    {
        self.capture_with(request, sink, |_| {})
    }

    /// Like [`Session::capture`], also calling `on_image` as each image
    /// finishes.
    pub fn capture_with<F, O>(
        &self,
        request: &CaptureRequest,
        sink: F,
        on_image: O,
    ) -> Result<CaptureReport, SessionError>
    where
        F: FnMut(&CaptureSlot<'_>) -> Result<(), SessionError>,
        O: FnMut(&ImageRecord),
    {
        let cameras = request
            .cameras()
            .iter()
            .map(|serial| self.registry.lookup(serial))
            .collect::<Result<Vec<_>, _>>()?;

        let options = CaptureOptions::from(&self.settings.capture);
        CaptureController::new(cameras, request, options, self.stop.clone())?
            .run_with(sink, on_image)
    }

    /// Returns every camera to `Found`, empties the registry and releases
    /// the device system.
    pub fn shutdown(mut self) -> Result<(), SessionError> {
        self.close()
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        if let Err(e) = self.system.unregister_hotplug() {
            tracing::warn!(error = %e, "Unregistering hot-plug handler failed");
        }
        self.registry.release_all();

        if self.system.is_in_use() {
            tracing::error!("Device system still in use after releasing all cameras");
            return Err(SessionError::System(DeviceError::InUse));
        }
        self.system.release().map_err(SessionError::System)?;
        tracing::info!("Session closed");
        Ok(())
    }

    fn with_camera<T>(
        &self,
        serial: &str,
        f: impl FnOnce(&mut CameraHandle) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let entry = self.registry.lookup(serial)?;
        let mut cam = entry.lock();
        cam.validate_found()?;
        f(&mut cam)
    }

    fn read_float(&self, serial: &str, path: &str) -> Result<f64, SessionError> {
        let value = self.feature_command(serial, path, Method::GetValue, None, None)?;
        value.as_ref().and_then(FeatureValue::as_f64).ok_or_else(|| {
            SessionError::device(
                serial,
                DeviceError::TypeMismatch {
                    feature: path.to_owned(),
                    expected: "float",
                    got: value.as_ref().map_or("nothing", FeatureValue::type_name),
                },
            )
        })
    }

    fn write_float(&self, serial: &str, path: &str, value: f64) -> Result<(), SessionError> {
        self.feature_command(
            serial,
            path,
            Method::SetValue,
            Some(AccessMode::ReadWrite),
            Some(FeatureValue::Float(value)),
        )
        .map(drop)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Session shutdown failed");
        }
    }
}

fn missing_serial(path: &Path) -> SessionError {
    SessionError::MalformedConfig(format!("{}: missing \"serial\" field", path.display()))
}
