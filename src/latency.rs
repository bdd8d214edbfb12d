/// Round-trip latency aggregation
///
/// Keeps a short sliding window of ping samples and the arithmetic mean
/// over it. The window is intentionally small so the published average
/// follows current conditions instead of history.
use std::collections::VecDeque;
use std::time::Duration;

/// Number of samples retained in the window
const WINDOW_SIZE: usize = 5;

/// Bounded sliding window of round-trip samples with a maintained average
#[derive(Debug, Clone, Default)]
pub struct LatencyAggregator {
    samples: VecDeque<Duration>,
    average: Option<Duration>,
}

impl LatencyAggregator {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW_SIZE),
            average: None,
        }
    }

    /// Add a sample, evicting the oldest once the window is full
    pub fn include(&mut self, sample: Duration) {
        if self.samples.len() == WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        let sum: Duration = self.samples.iter().sum();
        self.average = Some(sum / self.samples.len() as u32);
    }

    /// Mean over the current window, `None` when no samples are held
    pub fn average(&self) -> Option<Duration> {
        self.average
    }

    /// Drop all samples and the average
    pub fn clear(&mut self) {
        self.samples.clear();
        self.average = None;
    }
}
