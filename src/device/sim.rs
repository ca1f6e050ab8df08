//! Simulated camera rig.
//!
//! An in-process stand-in for a vendor SDK: each simulated camera has a
//! GenICam-style feature tree, a free-running device clock with a
//! timestamp latch, a bounded image buffer pool and scripted faults
//! (timeouts, dropped frames, incomplete frames). The [`SimRig`] handle
//! stays with the caller to plug/unplug cameras and inspect what the
//! session did to them; [`SimulatedSystem`] is the [`DeviceSystem`]
//! handed to the session.

use super::camera::{Device, DeviceError, DeviceSystem, HotplugEvent, HotplugHandler, RawImage};
use super::feature::{AccessMode, Feature, FeatureValue};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Namespace used for symbolic enumeration references (`Sim.<Symbol>`).
pub const SIM_NAMESPACE: &str = "Sim";

/// Enumeration features: (leaf name, full path, entries).
const ENUMERATIONS: &[(&str, &str, &[&str])] = &[
    (
        "StreamBufferCountMode",
        "TLStream.StreamBufferCountMode",
        &["Auto", "Manual"],
    ),
    (
        "StreamBufferHandlingMode",
        "TLStream.StreamBufferHandlingMode",
        &["OldestFirst", "OldestFirstOverwrite", "NewestOnly", "NewestFirst"],
    ),
    (
        "AcquisitionMode",
        "AcquisitionMode",
        &["Continuous", "SingleFrame", "MultiFrame"],
    ),
    ("TriggerMode", "TriggerMode", &["Off", "On"]),
    (
        "TriggerSource",
        "TriggerSource",
        &["Software", "Line0", "Line1", "Line2", "Line3"],
    ),
    (
        "UserSetSelector",
        "UserSetSelector",
        &["Default", "UserSet0", "UserSet1"],
    ),
];

fn enumeration_entries(path: &str) -> Option<&'static [&'static str]> {
    ENUMERATIONS
        .iter()
        .find(|(_, full, _)| *full == path)
        .map(|(_, _, entries)| *entries)
}

/// Scripted failure for one grab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabFault {
    /// No image arrives before the timeout.
    Timeout,
    /// The driver delivers an incomplete image.
    Incomplete,
    /// One frame is lost on the device; the delivered frame id skips ahead.
    SkipFrame,
}

/// Something the session did to a simulated camera.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Init,
    Deinit,
    BeginAcquisition,
    EndAcquisition,
    /// A grab attempt; `None` when it timed out.
    Grab { frame_id: Option<u64> },
    Release { buffer_id: u64 },
    SetValue { feature: String, value: FeatureValue },
    Execute { feature: String },
}

/// Description of a simulated camera.
#[derive(Debug, Clone)]
pub struct SimCameraSpec {
    /// Serial number.
    pub serial: String,
    /// Model name reported under `TLDevice`.
    pub model: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Bits per pixel.
    pub bits_per_pixel: u32,
    /// Device clock reading at attach time.
    pub uptime: Duration,
    /// Default number of driver buffers.
    pub buffer_pool: usize,
    /// Initial `AcquisitionFrameRate`.
    pub frame_rate: f64,
    /// Initial `ExposureTime` in microseconds.
    pub exposure_us: f64,
    /// Initial `Gain` in dB.
    pub gain_db: f64,
}

impl SimCameraSpec {
    /// Creates a small mono camera with the given serial.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            model: "Simulated Mono 64x48".to_owned(),
            width: 64,
            height: 48,
            bits_per_pixel: 8,
            uptime: Duration::from_secs(3600),
            buffer_pool: 10,
            frame_rate: 30.0,
            exposure_us: 10_000.0,
            gain_db: 0.0,
        }
    }

    /// Sets the device clock reading at attach time.
    pub fn with_uptime(mut self, uptime: Duration) -> Self {
        self.uptime = uptime;
        self
    }

    /// Sets the default driver buffer pool size.
    pub fn with_buffer_pool(mut self, buffers: usize) -> Self {
        self.buffer_pool = buffers.max(1);
        self
    }

    /// Sets the initial frame rate.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Sets the image dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

struct SimCameraState {
    spec: SimCameraSpec,
    attached: bool,
    initialized: bool,
    streaming: bool,
    created: Instant,
    latched_ns: i64,
    values: HashMap<&'static str, FeatureValue>,
    next_frame_id: u64,
    frames_this_acquisition: u64,
    next_buffer_id: u64,
    outstanding: HashSet<u64>,
    grabs: u64,
    faults: HashMap<u64, GrabFault>,
    fail_next_begin: bool,
    events: Vec<SimEvent>,
}

type SharedState = Arc<Mutex<SimCameraState>>;

impl SimCameraState {
    fn new(spec: SimCameraSpec) -> Self {
        let mut values = HashMap::new();
        values.insert(
            "TLDevice.DeviceSerialNumber",
            FeatureValue::String(spec.serial.clone()),
        );
        values.insert(
            "TLDevice.DeviceModelName",
            FeatureValue::String(spec.model.clone()),
        );
        values.insert(
            "TLStream.StreamBufferCountMode",
            FeatureValue::Enumeration("Auto".to_owned()),
        );
        values.insert(
            "TLStream.StreamBufferCountManual",
            FeatureValue::Integer(spec.buffer_pool as i64),
        );
        values.insert(
            "TLStream.StreamBufferHandlingMode",
            FeatureValue::Enumeration("NewestOnly".to_owned()),
        );
        values.insert(
            "AcquisitionMode",
            FeatureValue::Enumeration("Continuous".to_owned()),
        );
        values.insert("AcquisitionFrameCount", FeatureValue::Integer(2));
        values.insert("AcquisitionFrameRate", FeatureValue::Float(spec.frame_rate));
        values.insert("ExposureTime", FeatureValue::Float(spec.exposure_us));
        values.insert("Gain", FeatureValue::Float(spec.gain_db));
        values.insert("TriggerMode", FeatureValue::Enumeration("Off".to_owned()));
        values.insert(
            "TriggerSource",
            FeatureValue::Enumeration("Software".to_owned()),
        );
        values.insert(
            "UserSetSelector",
            FeatureValue::Enumeration("Default".to_owned()),
        );

        Self {
            spec,
            attached: true,
            initialized: false,
            streaming: false,
            created: Instant::now(),
            latched_ns: 0,
            values,
            next_frame_id: 0,
            frames_this_acquisition: 0,
            next_buffer_id: 1,
            outstanding: HashSet::new(),
            grabs: 0,
            faults: HashMap::new(),
            fail_next_begin: false,
            events: Vec::new(),
        }
    }

    fn device_now_ns(&self) -> i64 {
        let now = self.spec.uptime + self.created.elapsed();
        i64::try_from(now.as_nanos()).unwrap_or(i64::MAX)
    }

    fn enumeration(&self, path: &str) -> Option<&str> {
        match self.values.get(path) {
            Some(FeatureValue::Enumeration(entry)) => Some(entry.as_str()),
            _ => None,
        }
    }

    fn integer(&self, path: &str) -> Option<i64> {
        self.values.get(path).and_then(FeatureValue::as_i64)
    }

    fn float(&self, path: &str) -> Option<f64> {
        self.values.get(path).and_then(FeatureValue::as_f64)
    }

    fn pool_size(&self) -> usize {
        if self.enumeration("TLStream.StreamBufferCountMode") == Some("Manual") {
            self.integer("TLStream.StreamBufferCountManual")
                .and_then(|count| usize::try_from(count).ok())
                .unwrap_or(self.spec.buffer_pool)
        } else {
            self.spec.buffer_pool
        }
    }

    fn frame_limit(&self) -> Option<u64> {
        match self.enumeration("AcquisitionMode") {
            Some("SingleFrame") => Some(1),
            Some("MultiFrame") => self
                .integer("AcquisitionFrameCount")
                .and_then(|count| u64::try_from(count).ok()),
            _ => None,
        }
    }

    fn resulting_frame_rate(&self) -> f64 {
        let frame_rate = self.float("AcquisitionFrameRate").unwrap_or(0.0);
        let exposure_us = self.float("ExposureTime").unwrap_or(0.0);
        if exposure_us > 0.0 {
            frame_rate.min(1e6 / exposure_us)
        } else {
            frame_rate
        }
    }
}

enum NodeKind {
    Category(Vec<SimFeature>),
    Value {
        path: &'static str,
        access: AccessMode,
        locked_while_streaming: bool,
    },
    ResultingFrameRate,
    Command {
        path: &'static str,
    },
    Latch,
    LatchValue,
}

struct SimFeature {
    name: &'static str,
    requires_init: bool,
    kind: NodeKind,
    state: SharedState,
}

impl SimFeature {
    fn category(
        state: &SharedState,
        name: &'static str,
        requires_init: bool,
        children: Vec<SimFeature>,
    ) -> Self {
        Self {
            name,
            requires_init,
            kind: NodeKind::Category(children),
            state: Arc::clone(state),
        }
    }

    fn leaf(state: &SharedState, name: &'static str, requires_init: bool, kind: NodeKind) -> Self {
        Self {
            name,
            requires_init,
            kind,
            state: Arc::clone(state),
        }
    }

    fn value(
        state: &SharedState,
        name: &'static str,
        path: &'static str,
        access: AccessMode,
        locked_while_streaming: bool,
    ) -> Self {
        let requires_init = !path.starts_with("TL");
        Self::leaf(
            state,
            name,
            requires_init,
            NodeKind::Value {
                path,
                access,
                locked_while_streaming,
            },
        )
    }

    fn tree(state: &SharedState) -> Self {
        use AccessMode::{ReadOnly, ReadWrite};

        let tl_device = Self::category(
            state,
            "TLDevice",
            false,
            vec![
                Self::value(
                    state,
                    "DeviceSerialNumber",
                    "TLDevice.DeviceSerialNumber",
                    ReadOnly,
                    false,
                ),
                Self::value(
                    state,
                    "DeviceModelName",
                    "TLDevice.DeviceModelName",
                    ReadOnly,
                    false,
                ),
            ],
        );
        let tl_stream = Self::category(
            state,
            "TLStream",
            false,
            vec![
                Self::value(
                    state,
                    "StreamBufferCountMode",
                    "TLStream.StreamBufferCountMode",
                    ReadWrite,
                    true,
                ),
                Self::value(
                    state,
                    "StreamBufferCountManual",
                    "TLStream.StreamBufferCountManual",
                    ReadWrite,
                    true,
                ),
                Self::value(
                    state,
                    "StreamBufferHandlingMode",
                    "TLStream.StreamBufferHandlingMode",
                    ReadWrite,
                    true,
                ),
            ],
        );

        Self::category(
            state,
            "",
            false,
            vec![
                tl_device,
                tl_stream,
                Self::value(state, "AcquisitionMode", "AcquisitionMode", ReadWrite, true),
                Self::value(
                    state,
                    "AcquisitionFrameCount",
                    "AcquisitionFrameCount",
                    ReadWrite,
                    true,
                ),
                Self::value(
                    state,
                    "AcquisitionFrameRate",
                    "AcquisitionFrameRate",
                    ReadWrite,
                    false,
                ),
                Self::leaf(
                    state,
                    "AcquisitionResultingFrameRate",
                    true,
                    NodeKind::ResultingFrameRate,
                ),
                Self::value(state, "ExposureTime", "ExposureTime", ReadWrite, false),
                Self::value(state, "Gain", "Gain", ReadWrite, false),
                Self::value(state, "TriggerMode", "TriggerMode", ReadWrite, true),
                Self::value(state, "TriggerSource", "TriggerSource", ReadWrite, true),
                Self::value(state, "UserSetSelector", "UserSetSelector", ReadWrite, true),
                Self::leaf(
                    state,
                    "UserSetLoad",
                    true,
                    NodeKind::Command {
                        path: "UserSetLoad",
                    },
                ),
                Self::leaf(state, "TimestampLatch", true, NodeKind::Latch),
                Self::leaf(state, "TimestampLatchValue", true, NodeKind::LatchValue),
            ],
        )
    }

    fn ensure_access(&self, writable: bool) -> Result<(), DeviceError> {
        let mode = self.access_mode();
        let allowed = if writable {
            mode.is_writable()
        } else {
            mode.is_readable()
        };
        if allowed {
            Ok(())
        } else {
            Err(DeviceError::NotAccessible(self.name.to_owned()))
        }
    }
}

fn coerce(path: &str, current: &FeatureValue, value: FeatureValue) -> Result<FeatureValue, DeviceError> {
    let mismatch = |value: &FeatureValue| DeviceError::TypeMismatch {
        feature: path.to_owned(),
        expected: current.type_name(),
        got: value.type_name(),
    };

    match (current, value) {
        (FeatureValue::Integer(_), FeatureValue::Integer(v)) => Ok(FeatureValue::Integer(v)),
        (FeatureValue::Float(_), FeatureValue::Float(v)) => Ok(FeatureValue::Float(v)),
        (FeatureValue::Float(_), FeatureValue::Integer(v)) => Ok(FeatureValue::Float(v as f64)),
        (FeatureValue::Boolean(_), FeatureValue::Boolean(v)) => Ok(FeatureValue::Boolean(v)),
        (FeatureValue::String(_), FeatureValue::String(v)) => Ok(FeatureValue::String(v)),
        (FeatureValue::Enumeration(_), FeatureValue::Enumeration(entry))
        | (FeatureValue::Enumeration(_), FeatureValue::String(entry)) => {
            let entries = enumeration_entries(path).unwrap_or(&[]);
            if entries.contains(&entry.as_str()) {
                Ok(FeatureValue::Enumeration(entry))
            } else {
                Err(DeviceError::InvalidValue {
                    feature: path.to_owned(),
                    value: entry,
                })
            }
        }
        (_, other) => Err(mismatch(&other)),
    }
}

impl Feature for SimFeature {
    fn name(&self) -> &str {
        self.name
    }

    fn access_mode(&self) -> AccessMode {
        let state = self.state.lock();
        if !state.attached || (self.requires_init && !state.initialized) {
            return AccessMode::NotAvailable;
        }
        match &self.kind {
            NodeKind::Category(_) | NodeKind::ResultingFrameRate | NodeKind::LatchValue => {
                AccessMode::ReadOnly
            }
            NodeKind::Value {
                access,
                locked_while_streaming,
                ..
            } => {
                if *locked_while_streaming && state.streaming && access.is_writable() {
                    AccessMode::ReadOnly
                } else {
                    *access
                }
            }
            NodeKind::Command { .. } | NodeKind::Latch => AccessMode::WriteOnly,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Feature> {
        match &mut self.kind {
            NodeKind::Category(children) => children
                .iter_mut()
                .find(|child| child.name == name)
                .map(|child| child as &mut dyn Feature),
            _ => None,
        }
    }

    fn get_value(&self) -> Result<FeatureValue, DeviceError> {
        if matches!(
            self.kind,
            NodeKind::Category(_) | NodeKind::Command { .. } | NodeKind::Latch
        ) {
            return Err(DeviceError::Unsupported("GetValue".to_owned()));
        }
        self.ensure_access(false)?;

        let state = self.state.lock();
        match &self.kind {
            NodeKind::Value { path, .. } => state
                .values
                .get(path)
                .cloned()
                .ok_or_else(|| DeviceError::Driver(format!("no value stored for {path}"))),
            NodeKind::ResultingFrameRate => Ok(FeatureValue::Float(state.resulting_frame_rate())),
            NodeKind::LatchValue => Ok(FeatureValue::Integer(state.latched_ns)),
            _ => Err(DeviceError::Unsupported("GetValue".to_owned())),
        }
    }

    fn set_value(&mut self, value: FeatureValue) -> Result<(), DeviceError> {
        let NodeKind::Value { path, .. } = &self.kind else {
            return Err(DeviceError::Unsupported("SetValue".to_owned()));
        };
        let path = *path;
        self.ensure_access(true)?;

        let mut state = self.state.lock();
        let current = state
            .values
            .get(path)
            .ok_or_else(|| DeviceError::Driver(format!("no value stored for {path}")))?;
        let stored = coerce(path, current, value)?;
        state.values.insert(path, stored.clone());
        state.events.push(SimEvent::SetValue {
            feature: path.to_owned(),
            value: stored,
        });
        Ok(())
    }

    fn execute(&mut self) -> Result<(), DeviceError> {
        if !matches!(self.kind, NodeKind::Command { .. } | NodeKind::Latch) {
            return Err(DeviceError::Unsupported("Execute".to_owned()));
        }
        self.ensure_access(true)?;

        let mut state = self.state.lock();
        match &self.kind {
            NodeKind::Latch => {
                state.latched_ns = state.device_now_ns();
            }
            NodeKind::Command { path } => {
                state.events.push(SimEvent::Execute {
                    feature: (*path).to_owned(),
                });
            }
            _ => {}
        }
        Ok(())
    }
}

struct SimDevice {
    serial: String,
    state: SharedState,
    root: SimFeature,
    _lease: Arc<()>,
}

impl SimDevice {
    fn new(state: SharedState, lease: Arc<()>) -> Self {
        let serial = state.lock().spec.serial.clone();
        let root = SimFeature::tree(&state);
        Self {
            serial,
            state,
            root,
            _lease: lease,
        }
    }
}

impl Device for SimDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn is_valid(&self) -> bool {
        self.state.lock().attached
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if !state.attached {
            return Err(DeviceError::Disconnected);
        }
        state.initialized = true;
        state.events.push(SimEvent::Init);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if !state.attached {
            return Err(DeviceError::Disconnected);
        }
        if state.streaming {
            return Err(DeviceError::Driver(
                "cannot de-initialize while acquisition is running".to_owned(),
            ));
        }
        state.initialized = false;
        state.events.push(SimEvent::Deinit);
        Ok(())
    }

    fn begin_acquisition(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if !state.attached {
            return Err(DeviceError::Disconnected);
        }
        if !state.initialized {
            return Err(DeviceError::NotInitialized);
        }
        if state.streaming {
            return Err(DeviceError::AlreadyStreaming);
        }
        if std::mem::take(&mut state.fail_next_begin) {
            return Err(DeviceError::Driver("failed to start acquisition".to_owned()));
        }
        state.streaming = true;
        state.next_frame_id = 0;
        state.frames_this_acquisition = 0;
        state.events.push(SimEvent::BeginAcquisition);
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if !state.attached {
            return Err(DeviceError::Disconnected);
        }
        if !state.streaming {
            return Err(DeviceError::NotStreaming);
        }
        state.streaming = false;
        state.events.push(SimEvent::EndAcquisition);
        Ok(())
    }

    fn features(&mut self) -> &mut dyn Feature {
        &mut self.root
    }

    fn symbol_namespace(&self) -> &str {
        SIM_NAMESPACE
    }

    fn resolve_symbol(&self, symbol: &str) -> Option<FeatureValue> {
        let (feature, entry) = symbol.split_once('_')?;
        ENUMERATIONS
            .iter()
            .find(|(leaf, _, entries)| *leaf == feature && entries.contains(&entry))
            .map(|_| FeatureValue::Enumeration(entry.to_owned()))
    }

    fn next_image(&mut self, timeout: Duration) -> Result<RawImage, DeviceError> {
        let mut state = self.state.lock();
        if !state.attached {
            return Err(DeviceError::Disconnected);
        }
        if !state.streaming {
            return Err(DeviceError::NotStreaming);
        }

        state.grabs += 1;
        let grab = state.grabs;
        let fault = state.faults.remove(&grab);
        let exhausted_acquisition = state
            .frame_limit()
            .is_some_and(|limit| state.frames_this_acquisition >= limit);
        if fault == Some(GrabFault::Timeout) || exhausted_acquisition {
            state.events.push(SimEvent::Grab { frame_id: None });
            return Err(DeviceError::Timeout(timeout));
        }

        if state.outstanding.len() >= state.pool_size() {
            return Err(DeviceError::BufferPoolExhausted(state.outstanding.len()));
        }

        if fault == Some(GrabFault::SkipFrame) {
            state.next_frame_id += 1;
        }
        let frame_id = state.next_frame_id;
        state.next_frame_id += 1;
        state.frames_this_acquisition += 1;

        let buffer_id = state.next_buffer_id;
        state.next_buffer_id += 1;
        state.outstanding.insert(buffer_id);
        state.events.push(SimEvent::Grab {
            frame_id: Some(frame_id),
        });

        let (width, height, bits_per_pixel) = (
            state.spec.width,
            state.spec.height,
            state.spec.bits_per_pixel,
        );
        let size = (width as usize) * (height as usize) * (bits_per_pixel as usize).div_ceil(8);
        let data = (0..size)
            .map(|i| ((i as u64 + frame_id) % 256) as u8)
            .collect();

        Ok(RawImage {
            buffer_id,
            data,
            width,
            height,
            bits_per_pixel,
            frame_id,
            timestamp_ns: u64::try_from(state.device_now_ns()).unwrap_or(0),
            incomplete: fault == Some(GrabFault::Incomplete),
        })
    }

    fn release_image(&mut self, image: RawImage) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if !state.outstanding.remove(&image.buffer_id) {
            return Err(DeviceError::UnknownBuffer(image.buffer_id));
        }
        state.events.push(SimEvent::Release {
            buffer_id: image.buffer_id,
        });
        Ok(())
    }
}

#[derive(Default)]
struct RigInner {
    cameras: BTreeMap<String, SharedState>,
    handler: Option<Arc<HotplugHandler>>,
    lease: Arc<()>,
    released: bool,
}

/// Caller-side handle to the simulated rig.
///
/// Cheap to clone; all clones share the same cameras.
#[derive(Clone, Default)]
pub struct SimRig {
    inner: Arc<Mutex<RigInner>>,
}

impl SimRig {
    /// Creates an empty rig.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a rig with the given cameras already attached.
    pub fn with_cameras(specs: impl IntoIterator<Item = SimCameraSpec>) -> Self {
        let rig = Self::new();
        for spec in specs {
            rig.attach(spec);
        }
        rig
    }

    /// Returns the device system to hand to a session.
    pub fn system(&self) -> SimulatedSystem {
        SimulatedSystem { rig: self.clone() }
    }

    /// Attaches (or power-cycles) a camera, notifying the hot-plug handler.
    pub fn attach(&self, spec: SimCameraSpec) {
        let serial = spec.serial.clone();
        let state = Arc::new(Mutex::new(SimCameraState::new(spec)));

        let arrival = {
            let mut inner = self.inner.lock();
            if let Some(previous) = inner.cameras.insert(serial.clone(), Arc::clone(&state)) {
                previous.lock().attached = false;
            }
            inner
                .handler
                .clone()
                .map(|handler| (handler, SimDevice::new(state, Arc::clone(&inner.lease))))
        };

        tracing::debug!(serial = %serial, "Simulated camera attached");
        if let Some((handler, device)) = arrival {
            handler(HotplugEvent::Arrival(Box::new(device)));
        }
    }

    /// Detaches a camera, notifying the hot-plug handler.
    ///
    /// Returns false if no attached camera has this serial.
    pub fn detach(&self, serial: &str) -> bool {
        let handler = {
            let inner = self.inner.lock();
            let Some(state) = inner.cameras.get(serial) else {
                return false;
            };
            let mut state = state.lock();
            if !state.attached {
                return false;
            }
            state.attached = false;
            state.initialized = false;
            state.streaming = false;
            inner.handler.clone()
        };

        tracing::debug!(serial = %serial, "Simulated camera detached");
        if let Some(handler) = handler {
            handler(HotplugEvent::Removal(serial.to_owned()));
        }
        true
    }

    /// Scripts a fault for the `grab_number`-th grab (1-based, counted
    /// since attach) on a camera.
    pub fn inject_fault(&self, serial: &str, grab_number: u64, fault: GrabFault) {
        self.with_state(serial, |state| {
            state.faults.insert(grab_number, fault);
        });
    }

    /// Makes the next acquisition start on a camera fail.
    pub fn fail_next_acquisition_start(&self, serial: &str) {
        self.with_state(serial, |state| state.fail_next_begin = true);
    }

    /// Events recorded for a camera, oldest first.
    pub fn events(&self, serial: &str) -> Vec<SimEvent> {
        self.with_state(serial, |state| state.events.clone())
            .unwrap_or_default()
    }

    /// Current value of a feature, bypassing access checks.
    pub fn value(&self, serial: &str, path: &str) -> Option<FeatureValue> {
        self.with_state(serial, |state| state.values.get(path).cloned())
            .flatten()
    }

    /// Returns true while the camera is acquiring.
    pub fn is_streaming(&self, serial: &str) -> bool {
        self.with_state(serial, |state| state.streaming)
            .unwrap_or(false)
    }

    /// Returns true while the camera is initialized.
    pub fn is_initialized(&self, serial: &str) -> bool {
        self.with_state(serial, |state| state.initialized)
            .unwrap_or(false)
    }

    /// Number of image buffers handed out and not yet released.
    pub fn outstanding_buffers(&self, serial: &str) -> usize {
        self.with_state(serial, |state| state.outstanding.len())
            .unwrap_or(0)
    }

    fn with_state<T>(&self, serial: &str, f: impl FnOnce(&mut SimCameraState) -> T) -> Option<T> {
        let state = self.inner.lock().cameras.get(serial).cloned()?;
        let mut state = state.lock();
        Some(f(&mut state))
    }
}

/// [`DeviceSystem`] backed by a [`SimRig`].
pub struct SimulatedSystem {
    rig: SimRig,
}

impl DeviceSystem for SimulatedSystem {
    fn enumerate(&mut self) -> Result<Vec<Box<dyn Device>>, DeviceError> {
        let inner = self.rig.inner.lock();
        if inner.released {
            return Err(DeviceError::Driver("device system already released".to_owned()));
        }
        let devices = inner
            .cameras
            .values()
            .filter(|state| state.lock().attached)
            .map(|state| {
                Box::new(SimDevice::new(Arc::clone(state), Arc::clone(&inner.lease)))
                    as Box<dyn Device>
            })
            .collect();
        Ok(devices)
    }

    fn register_hotplug(&mut self, handler: HotplugHandler) -> Result<(), DeviceError> {
        self.rig.inner.lock().handler = Some(Arc::new(handler));
        Ok(())
    }

    fn unregister_hotplug(&mut self) -> Result<(), DeviceError> {
        self.rig.inner.lock().handler = None;
        Ok(())
    }

    fn is_in_use(&self) -> bool {
        Arc::strong_count(&self.rig.inner.lock().lease) > 1
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        if self.is_in_use() {
            return Err(DeviceError::InUse);
        }
        let mut inner = self.rig.inner.lock();
        inner.handler = None;
        inner.released = true;
        Ok(())
    }
}
