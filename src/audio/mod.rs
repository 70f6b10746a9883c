pub mod backend;
pub mod chunk;
pub mod file;
pub mod meter;
pub mod tap;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use backend::{
    AudioCapture, AudioFrame, AudioSource, CaptureConfig, CaptureFactory, CaptureHandle, FrameSink,
    NoCapture,
};
pub use chunk::FrameChunker;
pub use file::{AudioFile, FileCapture};
pub use meter::{LevelMeter, MeterConfig};
pub use tap::AnalysisTap;

#[cfg(feature = "microphone")]
pub use microphone::MicrophoneCapture;
