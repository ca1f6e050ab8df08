//! Camera SDK boundary.
//!
//! This module provides the trait-based abstraction over the vendor
//! camera SDK: a process-wide [`DeviceSystem`] that enumerates devices
//! and reports hot-plug events, and per-camera [`Device`] handles with
//! feature access, acquisition control and buffered image retrieval.
//! The session core never talks to a vendor library through anything
//! else.

use super::feature::{Feature, FeatureValue};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a camera SDK binding.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("timed out after {} ms waiting for an image", .0.as_millis())]
    Timeout(Duration),
    #[error("device is not initialized")]
    NotInitialized,
    #[error("device is not streaming")]
    NotStreaming,
    #[error("device is already streaming")]
    AlreadyStreaming,
    #[error("device has been disconnected")]
    Disconnected,
    #[error("feature {0} is not accessible")]
    NotAccessible(String),
    #[error("feature {feature} expects {expected}, got {got}")]
    TypeMismatch {
        feature: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{0} is not supported by this feature")]
    Unsupported(String),
    #[error("invalid value for {feature}: {value}")]
    InvalidValue { feature: String, value: String },
    #[error("image buffer pool exhausted ({0} buffers outstanding)")]
    BufferPoolExhausted(usize),
    #[error("unknown image buffer {0}")]
    UnknownBuffer(u64),
    #[error("device system is still in use")]
    InUse,
    #[error("driver error: {0}")]
    Driver(String),
}

/// An image buffer handed out by the driver.
///
/// The buffer belongs to the driver's pool and must be given back with
/// [`Device::release_image`] before the pool runs dry.
#[derive(Debug)]
pub struct RawImage {
    /// Driver-side buffer identifier.
    pub buffer_id: u64,
    /// Pixel data.
    pub data: Vec<u8>,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Bits per pixel.
    pub bits_per_pixel: u32,
    /// Device-stamped frame sequence number.
    pub frame_id: u64,
    /// Capture time on the device clock, in nanoseconds since power on.
    pub timestamp_ns: u64,
    /// Set when the driver delivered an incomplete frame.
    pub incomplete: bool,
}

/// A single camera as exposed by the SDK.
pub trait Device: Send {
    /// Device serial number.
    fn serial(&self) -> &str;

    /// Returns false once the underlying device has gone away.
    fn is_valid(&self) -> bool;

    /// Initializes the device (opens its register map).
    fn init(&mut self) -> Result<(), DeviceError>;

    /// De-initializes the device.
    fn deinit(&mut self) -> Result<(), DeviceError>;

    /// Starts image acquisition.
    fn begin_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Stops image acquisition.
    fn end_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Root of the device's feature tree.
    fn features(&mut self) -> &mut dyn Feature;

    /// Namespace prefix for symbolic enumeration references
    /// (`<namespace>.<Symbol>`).
    fn symbol_namespace(&self) -> &str;

    /// Resolves a symbol from the SDK's enumeration namespace.
    fn resolve_symbol(&self, symbol: &str) -> Option<FeatureValue>;

    /// Waits up to `timeout` for the next image.
    fn next_image(&mut self, timeout: Duration) -> Result<RawImage, DeviceError>;

    /// Returns an image buffer to the driver's pool.
    fn release_image(&mut self, image: RawImage) -> Result<(), DeviceError>;
}

/// Hot-plug notification delivered by a [`DeviceSystem`].
pub enum HotplugEvent {
    /// A camera was attached; the binding hands over its device handle.
    Arrival(Box<dyn Device>),
    /// The camera with this serial was detached.
    Removal(String),
}

impl fmt::Debug for HotplugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arrival(device) => f.debug_tuple("Arrival").field(&device.serial()).finish(),
            Self::Removal(serial) => f.debug_tuple("Removal").field(serial).finish(),
        }
    }
}

/// Callback registered with a [`DeviceSystem`] for hot-plug events.
pub type HotplugHandler = Box<dyn Fn(HotplugEvent) + Send + Sync>;

/// Process-wide entry point of the camera SDK.
///
/// Acquired once at startup and released once at shutdown. Release
/// fails while any device handle is still alive.
pub trait DeviceSystem: Send {
    /// Opens every currently attached camera.
    fn enumerate(&mut self) -> Result<Vec<Box<dyn Device>>, DeviceError>;

    /// Registers the hot-plug callback, replacing any previous one.
    fn register_hotplug(&mut self, handler: HotplugHandler) -> Result<(), DeviceError>;

    /// Removes the hot-plug callback.
    fn unregister_hotplug(&mut self) -> Result<(), DeviceError>;

    /// Returns true while device handles obtained from this system are alive.
    fn is_in_use(&self) -> bool;

    /// Releases the system.
    fn release(&mut self) -> Result<(), DeviceError>;
}
