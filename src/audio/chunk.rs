use super::backend::AudioFrame;

/// Fixed-size frame producer
///
/// Receives arbitrarily sized sample buffers from a device callback or a
/// decoder and cuts them into frames of exactly `frame_size` samples. A
/// trailing partial buffer is held until enough samples arrive.
#[derive(Debug)]
pub struct FrameChunker {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting for the next full frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Append mono samples, returning every frame that became complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let wanted = self.frame_size - self.pending.len();
            let take = wanted.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(AudioFrame::new(samples, self.sample_rate));
            }
        }

        frames
    }
}

/// Average interleaved channels down to mono
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => interleaved.to_vec(),
        n => interleaved
            .chunks_exact(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}
