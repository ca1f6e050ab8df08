//! Capture requests.

use crate::session::SessionError;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How many images a capture takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCount {
    /// A fixed number of images.
    Finite(u64),
    /// Until the stop signal is raised.
    Continuous,
}

impl ImageCount {
    /// Returns true if `index` is past the last image.
    pub fn is_done(self, index: u64) -> bool {
        match self {
            Self::Finite(count) => index >= count,
            Self::Continuous => false,
        }
    }
}

impl FromStr for ImageCount {
    type Err = SessionError;

    /// `"c"` means continuous; anything else must be a positive integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("c") {
            return Ok(Self::Continuous);
        }
        match s.parse::<u64>() {
            Ok(count) if count > 0 => Ok(Self::Finite(count)),
            _ => Err(SessionError::InvalidRequest(format!(
                "image count must be a positive integer or 'c', got {s:?}"
            ))),
        }
    }
}

impl fmt::Display for ImageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(count) => write!(f, "{count}"),
            Self::Continuous => f.write_str("c"),
        }
    }
}

/// A validated request to capture images from a group of cameras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    cameras: Vec<String>,
    bursts: u32,
    images: ImageCount,
    delay: Duration,
    timeout: Duration,
    counter: u64,
}

impl CaptureRequest {
    /// Starts a request for `cameras`, in acquisition start order
    /// (trigger secondaries before the primary).
    pub fn builder<I, S>(cameras: I) -> CaptureRequestBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CaptureRequestBuilder {
            cameras: cameras.into_iter().map(Into::into).collect(),
            bursts: 1,
            images: ImageCount::Finite(1),
            delay: Duration::ZERO,
            timeout: Duration::from_millis(5000),
            counter: 0,
        }
    }

    /// Serials in start order.
    pub fn cameras(&self) -> &[String] {
        &self.cameras
    }

    /// Frames per camera per image.
    pub fn bursts(&self) -> u32 {
        self.bursts
    }

    /// Number of images.
    pub fn images(&self) -> ImageCount {
        self.images
    }

    /// Time between image starts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Per-grab timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Name counter of the first image.
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// Builder for [`CaptureRequest`].
#[derive(Debug, Clone)]
pub struct CaptureRequestBuilder {
    cameras: Vec<String>,
    bursts: u32,
    images: ImageCount,
    delay: Duration,
    timeout: Duration,
    counter: u64,
}

impl CaptureRequestBuilder {
    /// Frames per camera per image (default 1).
    pub fn bursts(mut self, bursts: u32) -> Self {
        self.bursts = bursts;
        self
    }

    /// Number of images (default 1).
    pub fn images(mut self, images: ImageCount) -> Self {
        self.images = images;
        self
    }

    /// Time between image starts (default 0).
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Per-grab timeout (default 5 s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name counter of the first image (default 0).
    pub fn counter(mut self, counter: u64) -> Self {
        self.counter = counter;
        self
    }

    /// Validates and builds the request.
    pub fn build(self) -> Result<CaptureRequest, SessionError> {
        let invalid = |msg: &str| Err(SessionError::InvalidRequest(msg.to_owned()));

        if self.cameras.is_empty() {
            return invalid("no cameras selected");
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self.cameras.iter().find(|serial| !seen.insert(serial.as_str())) {
            return Err(SessionError::InvalidRequest(format!(
                "camera {duplicate} selected twice"
            )));
        }
        if self.bursts == 0 {
            return invalid("burst count must be at least 1");
        }
        if self.images == ImageCount::Finite(0) {
            return invalid("image count must be at least 1");
        }
        if self.timeout < Duration::from_millis(1) {
            return invalid("timeout must be at least 1 ms");
        }

        Ok(CaptureRequest {
            cameras: self.cameras,
            bursts: self.bursts,
            images: self.images,
            delay: self.delay,
            timeout: self.timeout,
            counter: self.counter,
        })
    }
}
