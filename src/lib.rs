//! Multi-Camera Session Library
//!
//! Session management for synchronized capture across independently
//! clocked machine-vision cameras (GenICam-style feature trees).
//!
//! # Architecture
//!
//! ```text
//! Session → CameraRegistry → CameraHandle (Found → Initialized → Streaming)
//!    ↓            ↑                 ↓
//! capture    hot-plug events   CommandGateway → device feature tree
//! ```
//!
//! - **device**: the SDK boundary (`Device`, `DeviceSystem`, `Feature`)
//!   plus a simulated rig implementing it
//! - **session**: registry, lifecycle, command gateway and clock offsets
//! - **config**: per-camera setup documents and session settings
//! - **capture**: synchronized multi-camera, multi-burst capture
//! - **metrics**: Prometheus counters for captures and cameras
//!
//! # Example
//!
//! ```no_run
//! use multicam_sync::{
//!     capture::{CaptureRequest, ImageCount},
//!     device::{SimCameraSpec, SimRig},
//!     Session, Settings,
//! };
//!
//! let rig = SimRig::with_cameras([SimCameraSpec::new("A"), SimCameraSpec::new("B")]);
//! let session = Session::open(Box::new(rig.system()), Settings::default()).unwrap();
//! session.initialize("A").unwrap();
//! session.initialize("B").unwrap();
//!
//! let request = CaptureRequest::builder(["B", "A"])
//!     .images(ImageCount::Finite(3))
//!     .build()
//!     .unwrap();
//! let report = session.capture(&request, |slot| {
//!     println!("image {} burst {}: {} frames", slot.image, slot.burst, slot.frames.len());
//!     Ok(())
//! }).unwrap();
//! assert_eq!(report.frames(), 6);
//! session.shutdown().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod config;
pub mod device;
pub mod metrics;
pub mod session;

// Re-export commonly used types at crate root
pub use capture::{CaptureReport, CaptureRequest, FrameResult, GrabbedFrame, ImageCount};
pub use config::{Settings, SetupDocument};
pub use device::{AccessMode, FeatureValue, Method};
pub use session::{CameraState, CameraStatus, Session, SessionError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
