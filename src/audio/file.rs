use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{AudioCapture, CaptureConfig, CaptureHandle};
use super::chunk::{downmix, FrameChunker};
use super::tap::AnalysisTap;
use crate::error::CaptureError;

/// A WAV file decoded to mono `f32`
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let samples = downmix(&interleaved, spec.channels);
        let duration_seconds = samples.len() as f64 / spec.sample_rate.max(1) as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Capture that replays a WAV file as a live input
///
/// With `realtime` set, frames are paced at the file's own sample rate and
/// dropped when the consumer falls behind, like a device callback would.
/// Otherwise they are produced as fast as the consumer reads them.
pub struct FileCapture {
    path: String,
    realtime: bool,
}

impl FileCapture {
    pub fn new(path: impl Into<String>, realtime: bool) -> Self {
        Self {
            path: path.into(),
            realtime,
        }
    }
}

#[async_trait::async_trait]
impl AudioCapture for FileCapture {
    async fn acquire(&self, config: &CaptureConfig) -> Result<CaptureHandle, CaptureError> {
        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(&path))
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .map_err(|e| CaptureError::DeviceUnavailable(format!("{:#}", e)))?;

        let sample_rate = audio.sample_rate;
        let tap = AnalysisTap::new(config.analysis_size);
        let (handle, mut sink) = CaptureHandle::new(sample_rate, tap.clone());

        let frame_size = config.frame_size;
        let realtime = self.realtime;

        let producer = tokio::spawn(async move {
            let mut chunker = FrameChunker::new(frame_size, sample_rate);
            let frames = chunker.push(&audio.samples);
            let total = frames.len();

            let mut pacing = realtime.then(|| {
                let period = Duration::from_secs_f64(frame_size as f64 / sample_rate.max(1) as f64);
                tokio::time::interval(period)
            });

            for frame in frames {
                if let Some(interval) = pacing.as_mut() {
                    interval.tick().await;
                }
                tap.feed(&frame.samples);

                let delivered = if realtime {
                    sink.offer(frame)
                } else {
                    sink.send(frame).await
                };
                if !delivered {
                    break;
                }
            }

            debug!("File capture finished ({} frames)", total);
        });

        info!(
            "File capture started: {} ({}Hz, {} samples/frame)",
            self.path, sample_rate, frame_size
        );

        Ok(handle.with_release(move || producer.abort()))
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
