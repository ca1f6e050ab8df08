//! Process-wide table of bound cameras keyed by serial.
//!
//! The registry is mutated by hot-plug callbacks coming from the driver's
//! thread as well as by the controlling thread, so the table sits behind
//! one lock and each handle behind its own. Removal only ever touches the
//! table: it never waits on a handle that a capture might be holding.

use super::clock::WallClock;
use super::handle::CameraHandle;
use super::SessionError;
use crate::device::{Device, HotplugEvent, HotplugHandler};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A registry slot: one camera handle plus its connection flag.
pub struct CameraEntry {
    serial: String,
    connected: AtomicBool,
    handle: Mutex<CameraHandle>,
}

impl CameraEntry {
    fn new(handle: CameraHandle) -> Self {
        Self {
            serial: handle.serial().to_owned(),
            connected: AtomicBool::new(true),
            handle: Mutex::new(handle),
        }
    }

    /// Camera serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// False once the camera has been unplugged.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Locks the handle for exclusive use.
    pub fn lock(&self) -> MutexGuard<'_, CameraHandle> {
        self.handle.lock()
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

/// Table of bound cameras.
pub struct CameraRegistry {
    cameras: Mutex<HashMap<String, Arc<CameraEntry>>>,
    clock: Arc<dyn WallClock>,
    offset_samples: usize,
}

impl CameraRegistry {
    /// Creates an empty registry; new handles use `clock` and take
    /// `offset_samples` latch samples per offset estimate.
    pub fn new(clock: Arc<dyn WallClock>, offset_samples: usize) -> Self {
        Self {
            cameras: Mutex::new(HashMap::new()),
            clock,
            offset_samples,
        }
    }

    /// Binds a newly attached device in state `Found`.
    ///
    /// Returns false (and drops `device`) if the serial is already bound.
    pub fn on_arrival(&self, device: Box<dyn Device>) -> bool {
        let serial = device.serial().to_owned();
        let mut cameras = self.cameras.lock();
        if cameras.contains_key(&serial) {
            tracing::debug!(serial = %serial, "Camera already bound, ignoring arrival");
            return false;
        }

        let handle = CameraHandle::new(device, Arc::clone(&self.clock), self.offset_samples);
        cameras.insert(serial.clone(), Arc::new(CameraEntry::new(handle)));
        tracing::info!(serial = %serial, "Camera connected");
        true
    }

    /// Unbinds a detached camera. Unknown serials are ignored.
    pub fn on_removal(&self, serial: &str) -> bool {
        let removed = self.cameras.lock().remove(serial);
        match removed {
            Some(entry) => {
                entry.mark_disconnected();
                tracing::info!(serial = %serial, "Camera disconnected");
                true
            }
            None => {
                tracing::debug!(serial = %serial, "Removal for unknown camera");
                false
            }
        }
    }

    /// Looks up a bound camera.
    pub fn lookup(&self, serial: &str) -> Result<Arc<CameraEntry>, SessionError> {
        self.cameras
            .lock()
            .get(serial)
            .cloned()
            .ok_or_else(|| SessionError::NotConnected {
                serial: serial.to_owned(),
            })
    }

    /// Bound serials, sorted.
    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.cameras.lock().keys().cloned().collect();
        serials.sort();
        serials
    }

    /// Bound entries, sorted by serial.
    pub fn entries(&self) -> Vec<Arc<CameraEntry>> {
        let mut entries: Vec<_> = self.cameras.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.serial.cmp(&b.serial));
        entries
    }

    /// Number of bound cameras.
    pub fn len(&self) -> usize {
        self.cameras.lock().len()
    }

    /// Returns true if no camera is bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forces every camera back to `Found` and empties the table.
    ///
    /// Returns the number of teardown steps that failed.
    pub fn release_all(&self) -> usize {
        let drained: Vec<Arc<CameraEntry>> =
            self.cameras.lock().drain().map(|(_, entry)| entry).collect();

        let count = drained.len();
        let failures: usize = drained
            .iter()
            .map(|entry| entry.lock().force_found())
            .sum();
        tracing::info!(cameras = count, failures, "Released all cameras");
        failures
    }

    /// Builds the hot-plug callback feeding this registry.
    ///
    /// The callback holds a weak reference so it never keeps the registry
    /// alive on its own.
    pub fn hotplug_handler(self: &Arc<Self>) -> HotplugHandler {
        let registry = Arc::downgrade(self);
        Box::new(move |event| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            match event {
                HotplugEvent::Arrival(device) => {
                    registry.on_arrival(device);
                }
                HotplugEvent::Removal(serial) => {
                    registry.on_removal(&serial);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceSystem, SimCameraSpec, SimRig};
    use crate::session::{CameraState, SystemClock};

    fn registry() -> Arc<CameraRegistry> {
        Arc::new(CameraRegistry::new(Arc::new(SystemClock), 3))
    }

    fn populate(rig: &SimRig, registry: &CameraRegistry) {
        for device in rig.system().enumerate().unwrap() {
            registry.on_arrival(device);
        }
    }

    #[test]
    fn test_removal_makes_lookup_fail() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A"), SimCameraSpec::new("B")]);
        let registry = registry();
        populate(&rig, &registry);

        let entry = registry.lookup("A").unwrap();
        assert!(registry.on_removal("A"));
        assert!(!entry.is_connected());
        assert!(matches!(
            registry.lookup("A"),
            Err(SessionError::NotConnected { .. })
        ));
        assert!(registry.lookup("B").is_ok());
    }

    #[test]
    fn test_removing_absent_serial_is_noop() {
        let registry = registry();
        assert!(!registry.on_removal("nope"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_arrival_keeps_existing_handle() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let registry = registry();
        populate(&rig, &registry);
        registry.lookup("A").unwrap().lock().initialize().unwrap();

        populate(&rig, &registry);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup("A").unwrap().lock().state(),
            CameraState::Initialized
        );
    }

    #[test]
    fn test_removal_does_not_wait_for_busy_handle() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A")]);
        let registry = registry();
        populate(&rig, &registry);

        let entry = registry.lookup("A").unwrap();
        let _busy = entry.lock();
        assert!(registry.on_removal("A"));
    }

    #[test]
    fn test_hotplug_handler_drives_registry() {
        let rig = SimRig::new();
        let registry = registry();
        let mut system = rig.system();
        system.register_hotplug(registry.hotplug_handler()).unwrap();

        rig.attach(SimCameraSpec::new("7"));
        assert_eq!(registry.serials(), vec!["7".to_owned()]);
        rig.detach("7");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_all_returns_cameras_to_found() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("A"), SimCameraSpec::new("B")]);
        let registry = registry();
        populate(&rig, &registry);
        for entry in registry.entries() {
            let mut cam = entry.lock();
            cam.initialize().unwrap();
            cam.start_acquisition().unwrap();
        }

        assert_eq!(registry.release_all(), 0);
        assert!(registry.is_empty());
        assert!(!rig.is_streaming("A"));
        assert!(!rig.is_initialized("B"));
    }
}
