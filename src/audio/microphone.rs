// Microphone capture via cpal
//
// cpal streams are not `Send` on every host, so the stream is built, played and
// finally dropped on a dedicated thread. The async side only sees the result
// of opening the device and a stop signal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedStreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::backend::{AudioCapture, CaptureConfig, CaptureHandle, FrameSink};
use super::chunk::{downmix, FrameChunker};
use super::tap::AnalysisTap;
use crate::error::CaptureError;

/// Default input device capture
pub struct MicrophoneCapture;

impl MicrophoneCapture {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MicrophoneCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioCapture for MicrophoneCapture {
    async fn acquire(&self, config: &CaptureConfig) -> Result<CaptureHandle, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let config = config.clone();

        thread::Builder::new()
            .name("voicelink-mic".to_string())
            .spawn(move || {
                let opened = open_stream(&config);
                let stream = match opened {
                    Ok((stream, handle)) => {
                        if ready_tx.send(Ok(handle)).is_err() {
                            // Acquirer went away; dropping the stream releases the device
                            return;
                        }
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Block until released (or the sender is dropped)
                let _ = stop_rx.recv();
                drop(stream);
                info!("Microphone stream closed");
            })
            .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to spawn capture thread: {}", e)))?;

        let handle = ready_rx
            .await
            .map_err(|_| CaptureError::DeviceUnavailable("capture thread exited".to_string()))??;

        Ok(handle.with_release(move || {
            let _ = stop_tx.send(());
        }))
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

fn open_stream(config: &CaptureConfig) -> Result<(Stream, CaptureHandle), CaptureError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string()))?;

    let supported = pick_config(&device, config.sample_rate)?;
    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();
    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels;

    info!(
        "Opening microphone: {} ({}Hz, {} channels, {:?})",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_rate,
        channels,
        sample_format
    );

    let tap = AnalysisTap::new(config.analysis_size);
    let (handle, sink) = CaptureHandle::new(sample_rate, tap.clone());
    let pipeline = Pipeline {
        chunker: FrameChunker::new(config.frame_size, sample_rate),
        sink,
        tap,
        channels,
    };

    let stream = match sample_format {
        SampleFormat::F32 => build::<f32>(&device, &stream_config, pipeline),
        SampleFormat::I16 => build::<i16>(&device, &stream_config, pipeline),
        SampleFormat::U16 => build::<u16>(&device, &stream_config, pipeline),
        other => Err(CaptureError::DeviceUnavailable(format!(
            "unsupported sample format {:?}",
            other
        ))),
    }?;

    stream.play().map_err(|e| classify(e.to_string()))?;

    Ok((stream, handle))
}

fn pick_config(
    device: &cpal::Device,
    preferred_rate: Option<u32>,
) -> Result<SupportedStreamConfig, CaptureError> {
    let default = device
        .default_input_config()
        .map_err(|e| classify(e.to_string()))?;

    let Some(rate) = preferred_rate else {
        return Ok(default);
    };

    let ranges = device
        .supported_input_configs()
        .map_err(|e| classify(e.to_string()))?;

    for range in ranges {
        if range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0 {
            return Ok(range.with_sample_rate(cpal::SampleRate(rate)));
        }
    }

    warn!(
        "Preferred sample rate {}Hz not supported, using device default {}Hz",
        rate,
        default.sample_rate().0
    );
    Ok(default)
}

struct Pipeline {
    chunker: FrameChunker,
    sink: FrameSink,
    tap: AnalysisTap,
    channels: u16,
}

impl Pipeline {
    fn process(&mut self, interleaved: &[f32]) {
        let mono = downmix(interleaved, self.channels);
        self.tap.feed(&mono);

        if !self.sink.is_connected() {
            return;
        }
        for frame in self.chunker.push(&mono) {
            if !self.sink.offer(frame) {
                break;
            }
        }
    }
}

fn build<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut pipeline: Pipeline,
) -> Result<Stream, CaptureError>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                pipeline.process(&scratch);
            },
            |err| error!("Microphone stream error: {}", err),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable("device not available".to_string())
            }
            other => classify(other.to_string()),
        })
}

/// Map a backend error description onto the capture taxonomy
fn classify(description: String) -> CaptureError {
    let lower = description.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::DeviceUnavailable(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(frame_size: usize) -> (CaptureHandle, Pipeline) {
        let tap = AnalysisTap::new(32);
        let (handle, sink) = CaptureHandle::new(16_000, tap.clone());
        let pipeline = Pipeline {
            chunker: FrameChunker::new(frame_size, 16_000),
            sink,
            tap,
            channels: 2,
        };
        (handle, pipeline)
    }

    #[test]
    fn test_classify_permission_errors() {
        for description in ["Permission denied", "access DENIED by policy", "App is not authorized"] {
            assert!(
                matches!(classify(description.to_string()), CaptureError::PermissionDenied),
                "{} should be a permission error",
                description
            );
        }
    }

    #[test]
    fn test_classify_other_errors_as_unavailable() {
        match classify("device busy".to_string()) {
            CaptureError::DeviceUnavailable(description) => assert_eq!(description, "device busy"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_process_drops_input_while_disconnected() {
        let (mut handle, mut pipeline) = pipeline(4);

        pipeline.process(&[0.5; 16]);
        assert_eq!(pipeline.chunker.pending(), 0);

        let mut frames = handle.take_frames().expect("frames");
        assert!(frames.try_recv().is_err());
    }

    #[test]
    fn test_process_downmixes_and_chunks_once_connected() {
        let (mut handle, mut pipeline) = pipeline(4);
        let mut frames = handle.take_frames().expect("frames");

        // Left at 1.0, right at 0.0, four stereo samples plus one left over
        let mut interleaved = [1.0, 0.0].repeat(5);
        interleaved[8] = 0.5;
        interleaved[9] = 0.5;
        pipeline.process(&interleaved);

        let frame = frames.try_recv().expect("one full frame");
        assert_eq!(frame.samples, vec![0.5; 4]);
        assert_eq!(frame.sample_rate, 16_000);
        assert!(frames.try_recv().is_err());
        assert_eq!(pipeline.chunker.pending(), 1);
    }

    #[test]
    fn test_process_feeds_tap_regardless_of_connection() {
        let (handle, mut pipeline) = pipeline(4);
        let tap = handle.tap();

        let tone: Vec<f32> = (0..64)
            .flat_map(|n| {
                let s = (2.0 * std::f32::consts::PI * 4.0 * n as f32 / 32.0).sin();
                [s, s]
            })
            .collect();
        let mut peak = 0;
        for _ in 0..20 {
            pipeline.process(&tone);
            peak = tap.byte_frequency_data().unwrap_or_default().into_iter().max().unwrap_or(0);
        }
        assert!(peak > 0);
    }
}
