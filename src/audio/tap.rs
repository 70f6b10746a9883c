// Amplitude-analysis tap shared between the capture graph and the level meter
//
// The producer side feeds every captured buffer into the tap; the meter side
// reads a byte-scaled magnitude spectrum of the most recent window, the same
// representation a browser AnalyserNode hands out (0..255 per bin, -100..-30 dB).

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::MAX_ANALYSIS_SIZE;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

#[derive(Clone)]
pub struct AnalysisTap {
    inner: Arc<TapInner>,
}

struct TapInner {
    size: usize,
    attached: AtomicBool,
    window: Vec<f32>,
    cos: Vec<f32>,
    sin: Vec<f32>,
    state: Mutex<TapState>,
}

struct TapState {
    /// Ring of the last `size` samples
    ring: Vec<f32>,
    head: usize,
    smoothed: Vec<f32>,
}

impl AnalysisTap {
    /// Create a tap analysing windows of `size` samples (clamped to 32..=MAX_ANALYSIS_SIZE, rounded to even)
    pub fn new(size: usize) -> Self {
        let size = size.clamp(32, MAX_ANALYSIS_SIZE) & !1;
        let window = (0..size)
            .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f32 / size as f32).cos()))
            .collect();
        let cos = (0..size)
            .map(|n| (2.0 * PI * n as f32 / size as f32).cos())
            .collect();
        let sin = (0..size)
            .map(|n| (2.0 * PI * n as f32 / size as f32).sin())
            .collect();

        Self {
            inner: Arc::new(TapInner {
                size,
                attached: AtomicBool::new(true),
                window,
                cos,
                sin,
                state: Mutex::new(TapState {
                    ring: vec![0.0; size],
                    head: 0,
                    smoothed: vec![0.0; size / 2],
                }),
            }),
        }
    }

    /// Number of frequency bins produced per read
    pub fn bin_count(&self) -> usize {
        self.inner.size / 2
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::SeqCst)
    }

    /// Disconnect the tap from its graph; subsequent reads return `None`
    pub fn detach(&self) {
        self.inner.attached.store(false, Ordering::SeqCst);
    }

    /// Push captured samples into the analysis window
    pub fn feed(&self, samples: &[f32]) {
        if !self.is_attached() {
            return;
        }
        let mut state = self.lock();
        let size = self.inner.size;
        for &sample in samples {
            let head = state.head;
            state.ring[head] = if sample.is_finite() { sample } else { 0.0 };
            state.head = (head + 1) % size;
        }
    }

    /// Byte-scaled magnitude spectrum of the current window, or `None` once detached
    pub fn byte_frequency_data(&self) -> Option<Vec<u8>> {
        if !self.is_attached() {
            return None;
        }

        let inner = &self.inner;
        let size = inner.size;
        let mut state = self.lock();

        let windowed: Vec<f32> = (0..size)
            .map(|n| state.ring[(state.head + n) % size] * inner.window[n])
            .collect();

        let mut bins = Vec::with_capacity(size / 2);
        for k in 0..size / 2 {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (n, &x) in windowed.iter().enumerate() {
                let idx = (k * n) % size;
                re += x * inner.cos[idx];
                im -= x * inner.sin[idx];
            }
            let magnitude = (re * re + im * im).sqrt() / size as f32;
            let smoothed = SMOOTHING * state.smoothed[k] + (1.0 - SMOOTHING) * magnitude;
            state.smoothed[k] = smoothed;
            bins.push(to_byte(smoothed));
        }

        Some(bins)
    }

    fn lock(&self) -> MutexGuard<'_, TapState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 || !magnitude.is_finite() {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}
