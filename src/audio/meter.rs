use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::tap::AnalysisTap;

/// Average byte-scale energy that maps to a full-scale level
pub const DEFAULT_PEAK_REFERENCE: f32 = 128.0;

/// Roughly one display refresh
pub const DEFAULT_TICK_MS: u64 = 16;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Sampling cadence in milliseconds
    pub tick_ms: u64,
    /// Divisor applied to the average bin energy
    pub peak_reference: f32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            peak_reference: DEFAULT_PEAK_REFERENCE,
        }
    }
}

/// Normalize a byte-scaled spectrum to a level in [0, 1]
pub fn normalized_level(bins: &[u8], peak_reference: f32) -> f32 {
    if bins.is_empty() || !peak_reference.is_finite() || peak_reference <= 0.0 {
        return 0.0;
    }
    let average = bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32;
    (average / peak_reference).clamp(0.0, 1.0)
}

/// Bar heights in pixels for a five-bar style level display
///
/// Bars above the level sit at the 10px floor; lit bars grow quadratically
/// with the level and get taller towards the right.
pub fn bar_heights(level: f32, bars: usize) -> Vec<f32> {
    let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
    (0..bars)
        .map(|i| {
            if (i as f32) < level * bars as f32 {
                let height = level.powi(2) * 100.0 * (1.0 + i as f32 / bars as f32) * 2.0;
                height.max(10.0)
            } else {
                10.0
            }
        })
        .collect()
}

/// Samples an analysis tap on a fixed cadence and reports normalized levels
///
/// Once [`LevelMeter::stop`] returns, the callback is never invoked again.
pub struct LevelMeter {
    config: MeterConfig,
    running: Arc<Mutex<bool>>,
    task: Option<JoinHandle<()>>,
}

impl LevelMeter {
    pub fn new(config: MeterConfig) -> Self {
        Self {
            config,
            running: Arc::new(Mutex::new(false)),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.running)
    }

    /// Start sampling `tap`, replacing any previous run
    pub fn start<F>(&mut self, tap: AnalysisTap, on_sample: F)
    where
        F: Fn(f32) + Send + 'static,
    {
        self.stop();

        let running = Arc::new(Mutex::new(true));
        self.running = Arc::clone(&running);

        let period = Duration::from_millis(self.config.tick_ms.max(1));
        let peak_reference = self.config.peak_reference;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                // A detached tap means the capture is gone
                let Some(bins) = tap.byte_frequency_data() else {
                    debug!("Analysis tap detached, level meter exiting");
                    break;
                };
                let level = normalized_level(&bins, peak_reference);

                let guard = lock(&running);
                if !*guard {
                    break;
                }
                on_sample(level);
            }
        }));
    }

    /// Stop sampling. Idempotent.
    pub fn stop(&mut self) {
        *lock(&self.running) = false;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LevelMeter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
