// src/stats/distribution.rs
use parking_lot::Mutex;

const DEFAULT_WINDOW: usize = 1000;

/// Running response-time statistics over a bounded sample reservoir.
///
/// The reservoir is a fixed-size ring: once full, new samples overwrite
/// the oldest ones, so the mean and percentiles track recent behaviour
/// while the lifetime counters keep growing.
#[derive(Debug)]
pub struct Distribution {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    samples: Vec<f64>,
    capacity: usize,
    next: usize,
    total_count: u64,
    total_sum: f64,
}

impl Distribution {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                samples: Vec::with_capacity(capacity),
                capacity,
                next: 0,
                total_count: 0,
                total_sum: 0.0,
            }),
        }
    }

    pub fn record(&self, value: f64) {
        let mut inner = self.inner.lock();
        inner.total_count += 1;
        inner.total_sum += value;
        if inner.samples.len() < inner.capacity {
            inner.samples.push(value);
        } else {
            let slot = inner.next;
            inner.samples[slot] = value;
        }
        inner.next = (inner.next + 1) % inner.capacity;
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().total_count
    }

    /// Mean of the samples currently in the window; 0.0 when empty.
    pub fn mean(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.samples.is_empty() {
            return 0.0;
        }
        inner.samples.iter().sum::<f64>() / inner.samples.len() as f64
    }

    /// Lifetime mean over every sample ever recorded; 0.0 when empty.
    pub fn lifetime_mean(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.total_count == 0 {
            return 0.0;
        }
        inner.total_sum / inner.total_count as f64
    }

    /// Percentile over the current window using nearest-rank; 0.0 when
    /// empty. `p` is clamped to `[0, 100]`.
    pub fn percentile(&self, p: f64) -> f64 {
        let inner = self.inner.lock();
        if inner.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = inner.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let p = p.clamp(0.0, 100.0);
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }
}

impl Default for Distribution {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
