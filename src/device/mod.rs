//! Camera SDK boundary and the simulated rig.
//!
//! Everything the session core needs from a vendor SDK is expressed by
//! the traits in this module. [`SimulatedSystem`] implements them in
//! process so the core can be driven without hardware.

mod camera;
mod feature;
mod sim;

pub use camera::{Device, DeviceError, DeviceSystem, HotplugEvent, HotplugHandler, RawImage};
pub use feature::{
    resolve, AccessMode, Feature, FeatureValue, Method, ParseAccessModeError, ParseMethodError,
};
pub use sim::{GrabFault, SimCameraSpec, SimEvent, SimRig, SimulatedSystem, SIM_NAMESPACE};
