use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::tap::AnalysisTap;
use crate::error::CaptureError;

/// Hardware buffer size used by the capture graph (samples per frame)
pub const DEFAULT_FRAME_SIZE: usize = 2048;

/// Samples fed into the analysis tap per spectrum
pub const DEFAULT_ANALYSIS_SIZE: usize = 256;

/// Largest analysis window; the spectrum is recomputed on every meter tick
pub const MAX_ANALYSIS_SIZE: usize = 2048;

/// Frames buffered between the producer and the session before new ones are dropped
pub const FRAME_CHANNEL_CAPACITY: usize = 32;

/// One fixed-size buffer of mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Single-channel samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Capture sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Raw wire encoding: little-endian `f32` samples, no header.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Configuration for building a capture graph
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Samples per emitted frame (fixed for the capture's lifetime)
    pub frame_size: usize,
    /// Preferred device sample rate; `None` keeps the device default
    pub sample_rate: Option<u32>,
    /// Window length of the analysis tap
    pub analysis_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            sample_rate: None,
            analysis_size: DEFAULT_ANALYSIS_SIZE,
        }
    }
}

/// Audio capture trait
///
/// Implementations:
/// - Microphone: cpal default input device (`microphone` feature)
/// - File: replay a WAV file as if it were a live input
#[async_trait::async_trait]
pub trait AudioCapture: Send + Sync {
    /// Acquire the input and build the capture graph
    ///
    /// May suspend for as long as the platform takes to grant access.
    async fn acquire(&self, config: &CaptureConfig) -> Result<CaptureHandle, CaptureError>;

    /// Get capture name for logging
    fn name(&self) -> &str;
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A live capture graph: frame sequence, analysis tap, and the means to tear it down
///
/// The frame producer stays disconnected until the frames are taken, so no
/// audio captured before that point is ever delivered. Dropping the handle
/// releases it.
pub struct CaptureHandle {
    sample_rate: u32,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    connect: watch::Sender<bool>,
    tap: AnalysisTap,
    release: Option<ReleaseFn>,
    released: bool,
}

impl CaptureHandle {
    /// Create a handle and the producer-side sink feeding it
    pub fn new(sample_rate: u32, tap: AnalysisTap) -> (Self, FrameSink) {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (connect, connected) = watch::channel(false);

        let handle = Self {
            sample_rate,
            frames: Some(rx),
            connect,
            tap,
            release: None,
            released: false,
        };

        (handle, FrameSink { tx, connected })
    }

    /// Register the hardware/producer teardown run by [`CaptureHandle::release`]
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Connect the frame producer and take its sequence. Only the first call returns it.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        let frames = self.frames.take()?;
        self.connect.send_replace(true);
        Some(frames)
    }

    /// Shared amplitude-analysis tap
    pub fn tap(&self) -> AnalysisTap {
        self.tap.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop the hardware input and detach the tap. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        debug!("Releasing capture ({}Hz)", self.sample_rate);
        self.tap.detach();
        self.connect.send_replace(false);
        self.frames = None;
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("sample_rate", &self.sample_rate)
            .field("released", &self.released)
            .finish()
    }
}

/// Producer side of a capture's frame sequence
pub struct FrameSink {
    tx: mpsc::Sender<AudioFrame>,
    connected: watch::Receiver<bool>,
}

impl FrameSink {
    /// Whether the session is currently consuming frames
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Whether the consuming handle has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Offer a frame without waiting, as a device callback must
    ///
    /// Frames are dropped while disconnected or when the consumer is behind.
    /// Returns `false` once the consumer is gone.
    pub fn offer(&self, frame: AudioFrame) -> bool {
        if !self.is_connected() {
            return !self.tx.is_closed();
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Frame consumer behind, dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Wait until connected, then deliver a frame with backpressure
    ///
    /// Returns `false` once the consumer is gone.
    pub async fn send(&mut self, frame: AudioFrame) -> bool {
        if self.connected.wait_for(|connected| *connected).await.is_err() {
            return false;
        }
        self.tx.send(frame).await.is_ok()
    }
}

/// Placeholder for configurations that never capture audio
///
/// Handshake-only sessions do not acquire an input; if one is ever
/// requested it fails as an unavailable device.
pub struct NoCapture;

#[async_trait::async_trait]
impl AudioCapture for NoCapture {
    async fn acquire(&self, _config: &CaptureConfig) -> Result<CaptureHandle, CaptureError> {
        Err(CaptureError::DeviceUnavailable(
            "no audio input configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Capture factory
pub struct CaptureFactory;

impl CaptureFactory {
    /// Create a capture for the configured source
    pub fn create(source: &AudioSource) -> Result<Arc<dyn AudioCapture>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "microphone")]
                {
                    use super::microphone::MicrophoneCapture;
                    Ok(Arc::new(MicrophoneCapture::new()))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    anyhow::bail!(
                        "Microphone capture requires the `microphone` feature; \
                        rebuild with --features microphone or use a file source"
                    )
                }
            }

            AudioSource::File { path, realtime } => {
                use super::file::FileCapture;
                Ok(Arc::new(FileCapture::new(path.clone(), *realtime)))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// WAV file, paced at real time or as fast as the consumer reads
    File { path: String, realtime: bool },
}
