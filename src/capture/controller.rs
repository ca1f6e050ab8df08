//! Synchronized multi-camera capture.
//!
//! For every image the controller paces itself against the requested
//! inter-image delay, starts acquisition on all cameras (in request
//! order, so trigger secondaries are armed before the primary fires),
//! grabs one frame per camera per burst, checks that frame ids line up
//! with the burst index, hands each slot to the caller's sink, releases
//! the slot's buffers together and always ends acquisition again.

use super::frame::{CaptureReport, CaptureSlot, FrameResult, ImageOutcome, ImageRecord};
use super::request::CaptureRequest;
use crate::config::CaptureSettings;
use crate::device::{AccessMode, FeatureValue, Method};
use crate::session::{CameraEntry, CameraState, CommandGateway, SessionError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative stop flag, checked between images.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Creates a lowered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lowers the signal again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true once raised.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Knobs for a capture run.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Pacing overshoot above which a warning is logged.
    pub delay_tolerance: Duration,
    /// Driver buffers to configure per camera; `None` leaves the stream
    /// and acquisition mode settings alone.
    pub stream_buffer_count: Option<u32>,
    /// Re-estimate clock offsets before the first image.
    pub refresh_offsets: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::from(&CaptureSettings::default())
    }
}

impl From<&CaptureSettings> for CaptureOptions {
    fn from(settings: &CaptureSettings) -> Self {
        Self {
            delay_tolerance: settings.delay_tolerance(),
            stream_buffer_count: Some(settings.stream_buffer_count),
            refresh_offsets: true,
        }
    }
}

/// Runs one [`CaptureRequest`] against bound cameras.
pub struct CaptureController<'r> {
    cameras: Vec<Arc<CameraEntry>>,
    request: &'r CaptureRequest,
    options: CaptureOptions,
    stop: StopSignal,
}

impl<'r> CaptureController<'r> {
    /// `cameras` must be the request's cameras, in request order.
    pub fn new(
        cameras: Vec<Arc<CameraEntry>>,
        request: &'r CaptureRequest,
        options: CaptureOptions,
        stop: StopSignal,
    ) -> Result<Self, SessionError> {
        let matches = cameras.len() == request.cameras().len()
            && cameras
                .iter()
                .zip(request.cameras())
                .all(|(entry, serial)| entry.serial() == serial);
        if !matches {
            return Err(SessionError::InvalidRequest(
                "camera entries do not match the request".to_owned(),
            ));
        }
        Ok(Self {
            cameras,
            request,
            options,
            stop,
        })
    }

    /// Runs the capture, calling `sink` once per burst slot.
    ///
    /// Grab timeouts and frame id mismatches are recorded per image and
    /// do not end the capture; any other failure (including one returned
    /// by `sink`) ends it after acquisition has been stopped.
    pub fn run<F>(self, sink: F) -> Result<CaptureReport, SessionError>
    where
        F: FnMut(&CaptureSlot<'_>) -> Result<(), SessionError>,
    {
        self.run_with(sink, |_| {})
    }

    /// Like [`CaptureController::run`], also calling `on_image` as soon as
    /// each image is finished.
    pub fn run_with<F, O>(self, mut sink: F, mut on_image: O) -> Result<CaptureReport, SessionError>
    where
        F: FnMut(&CaptureSlot<'_>) -> Result<(), SessionError>,
        O: FnMut(&ImageRecord),
    {
        self.prepare()?;

        let mut report = CaptureReport {
            next_counter: self.request.counter(),
            ..Default::default()
        };
        let started = Instant::now();
        let mut index = 0;

        while !self.request.images().is_done(index) {
            if self.stop.is_stopped() {
                tracing::info!(images = index, "Capture stopped");
                report.stopped = true;
                break;
            }
            if !self.pace(started, index) {
                tracing::warn!(image = index, "Image start time out of range, stopping capture");
                report.stopped = true;
                break;
            }

            let record = self.capture_image(index, report.next_counter, &mut sink)?;
            tracing::info!(
                image = index,
                counter = record.counter,
                frames = record.frames,
                outcome = record.outcome.label(),
                "Image captured"
            );
            on_image(&record);
            report.images.push(record);
            report.next_counter += 1;
            index += 1;
        }
        Ok(report)
    }

    /// Configures streams and acquisition mode, then refreshes offsets.
    fn prepare(&self) -> Result<(), SessionError> {
        for entry in &self.cameras {
            check_connected(entry)?;
            let mut cam = entry.lock();
            if cam.state() != CameraState::Initialized {
                return Err(SessionError::InvalidState {
                    serial: entry.serial().to_owned(),
                    required: CameraState::Initialized,
                    actual: cam.state(),
                });
            }

            if let Some(count) = self.options.stream_buffer_count {
                let cam = &mut *cam;
                set_feature(cam, "TLStream.StreamBufferCountMode", enumeration("Manual"))?;
                set_feature(
                    cam,
                    "TLStream.StreamBufferCountManual",
                    FeatureValue::Integer(i64::from(count)),
                )?;
                set_feature(cam, "TLStream.StreamBufferHandlingMode", enumeration("OldestFirst"))?;
                // MultiFrame with a frame count of one is rejected by some devices
                if self.request.bursts() == 1 {
                    set_feature(cam, "AcquisitionMode", enumeration("SingleFrame"))?;
                } else {
                    set_feature(cam, "AcquisitionMode", enumeration("MultiFrame"))?;
                    set_feature(
                        cam,
                        "AcquisitionFrameCount",
                        FeatureValue::Integer(i64::from(self.request.bursts())),
                    )?;
                }
            }

            if self.options.refresh_offsets {
                cam.refresh_clock_offset()?;
            }
        }
        Ok(())
    }

    /// Waits until image `index` is due. Returns false if its start time
    /// cannot be represented.
    fn pace(&self, started: Instant, index: u64) -> bool {
        let delay = self.request.delay();
        if delay.is_zero() {
            return true;
        }

        let Some(due) = due_time(delay, index) else {
            return false;
        };
        let elapsed = started.elapsed();
        if elapsed < due {
            std::thread::sleep(due - elapsed);
        }

        let overshoot = started.elapsed().saturating_sub(due);
        if overshoot > self.options.delay_tolerance {
            tracing::warn!(
                image = index,
                overshoot_ms = overshoot.as_secs_f64() * 1e3,
                tolerance_ms = self.options.delay_tolerance.as_secs_f64() * 1e3,
                "Image started late; delay is probably too short"
            );
        }
        true
    }

    fn capture_image<F>(
        &self,
        index: u64,
        counter: u64,
        sink: &mut F,
    ) -> Result<ImageRecord, SessionError>
    where
        F: FnMut(&CaptureSlot<'_>) -> Result<(), SessionError>,
    {
        let mut guard = AcquisitionGuard::start(&self.cameras)?;
        let grabbed = self.grab_bursts(index, counter, sink);
        let ended = guard.finish();

        let (bursts, frames, outcome) = match (grabbed, ended) {
            (Ok(grabbed), Ok(())) => grabbed,
            (Ok(_), Err(end)) => return Err(end),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(end)) => {
                tracing::warn!(error = %end, "Ending acquisition failed after capture error");
                return Err(e);
            }
        };

        Ok(ImageRecord {
            index,
            counter,
            bursts,
            frames,
            outcome,
        })
    }

    fn grab_bursts<F>(
        &self,
        index: u64,
        counter: u64,
        sink: &mut F,
    ) -> Result<(u32, usize, ImageOutcome), SessionError>
    where
        F: FnMut(&CaptureSlot<'_>) -> Result<(), SessionError>,
    {
        let timeout = self.request.timeout();
        let mut frames = 0;
        let mut empty = 0;

        for burst in 0..self.request.bursts() {
            let mut slot = Vec::with_capacity(self.cameras.len());
            for entry in &self.cameras {
                match grab_one(entry, timeout) {
                    Ok(result) => slot.push(result),
                    Err(e) if e.is_timeout() => {
                        tracing::warn!(serial = %entry.serial(), image = index, burst, error = %e, "Grab timed out");
                        slot.push(FrameResult::empty(entry.serial()));
                    }
                    Err(e) => {
                        if let Err(release) = release_slot(&self.cameras, slot) {
                            tracing::warn!(error = %release, "Releasing buffers after grab failure failed");
                        }
                        return Err(e);
                    }
                }
            }

            if let Some(desync) = check_alignment(&slot, index, burst) {
                tracing::warn!(error = %desync, "Dropped frames detected, skipping remaining bursts");
                release_slot(&self.cameras, slot)?;
                return Ok((
                    burst,
                    frames,
                    ImageOutcome::Aborted {
                        error: desync,
                        empty,
                    },
                ));
            }

            let delivered = slot.iter().filter(|result| !result.is_empty()).count();
            let delivered_to_sink = sink(&CaptureSlot {
                image: index,
                burst,
                counter,
                frames: &slot,
            });
            let released = release_slot(&self.cameras, slot);
            delivered_to_sink?;
            released?;

            frames += delivered;
            empty += self.cameras.len() - delivered;
        }

        let outcome = if empty == 0 {
            ImageOutcome::Complete
        } else {
            ImageOutcome::Partial { empty }
        };
        Ok((self.request.bursts(), frames, outcome))
    }
}

/// Start time of image `index`, relative to the first image.
fn due_time(delay: Duration, index: u64) -> Option<Duration> {
    let nanos = delay.as_nanos().checked_mul(u128::from(index))?;
    let secs = u64::try_from(nanos / 1_000_000_000).ok()?;
    Some(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}

/// Every non-empty frame in a slot must carry the burst index as its id.
fn check_alignment(slot: &[FrameResult], image: u64, burst: u32) -> Option<SessionError> {
    let aligned = slot
        .iter()
        .filter_map(FrameResult::frame)
        .all(|frame| frame.frame_id() == u64::from(burst));
    if aligned {
        return None;
    }

    let frame_ids = slot
        .iter()
        .filter_map(FrameResult::frame)
        .map(|frame| (frame.serial().to_owned(), frame.frame_id()))
        .collect();
    Some(SessionError::Desync {
        image,
        burst,
        frame_ids,
    })
}

fn set_feature(
    cam: &mut dyn CommandGateway,
    path: &str,
    value: FeatureValue,
) -> Result<(), SessionError> {
    cam.execute(path, Method::SetValue, Some(AccessMode::ReadWrite), Some(value))
        .map(drop)
}

fn enumeration(entry: &str) -> FeatureValue {
    FeatureValue::Enumeration(entry.to_owned())
}

fn check_connected(entry: &CameraEntry) -> Result<(), SessionError> {
    if entry.is_connected() {
        Ok(())
    } else {
        Err(SessionError::NotConnected {
            serial: entry.serial().to_owned(),
        })
    }
}

fn grab_one(entry: &CameraEntry, timeout: Duration) -> Result<FrameResult, SessionError> {
    check_connected(entry)?;
    entry.lock().grab(timeout)
}

/// Releases every frame of a slot; slot order matches `cameras`.
fn release_slot(cameras: &[Arc<CameraEntry>], slot: Vec<FrameResult>) -> Result<(), SessionError> {
    let mut errors: Vec<SessionError> = cameras
        .iter()
        .zip(slot)
        .filter_map(|(entry, result)| {
            let frame = result.into_frame()?;
            entry.lock().release(frame).err()
        })
        .collect();

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(SessionError::Acquisition(errors)),
    }
}

/// Acquisition scope over a camera group.
///
/// Cameras are started in order; whatever was started is ended again by
/// [`AcquisitionGuard::finish`] or, failing that, on drop.
struct AcquisitionGuard<'c> {
    cameras: &'c [Arc<CameraEntry>],
    started: usize,
}

impl<'c> AcquisitionGuard<'c> {
    fn start(cameras: &'c [Arc<CameraEntry>]) -> Result<Self, SessionError> {
        let mut guard = Self { cameras, started: 0 };
        for entry in cameras {
            let started = check_connected(entry).and_then(|()| entry.lock().start_acquisition());
            if let Err(e) = started {
                let mut errors = vec![e];
                if let Err(end) = guard.finish() {
                    match end {
                        SessionError::Acquisition(more) => errors.extend(more),
                        other => errors.push(other),
                    }
                }
                return Err(SessionError::Acquisition(errors));
            }
            guard.started += 1;
        }
        Ok(guard)
    }

    /// Ends acquisition on every started camera, collecting failures.
    fn finish(&mut self) -> Result<(), SessionError> {
        let started = std::mem::take(&mut self.started);
        let errors: Vec<SessionError> = self.cameras[..started]
            .iter()
            .filter_map(|entry| entry.lock().end_acquisition().err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Acquisition(errors))
        }
    }
}

impl Drop for AcquisitionGuard<'_> {
    fn drop(&mut self) {
        if self.started > 0 {
            if let Err(e) = self.finish() {
                tracing::warn!(error = %e, "Ending acquisition on drop failed");
            }
        }
    }
}
