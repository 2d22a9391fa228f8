//! In-memory latency histogram for outbound sends.
//! The send gate records each successful delivery; /health reads it.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub samples: u64,
}

impl LatencyStats {
    /// Tracks 1us to 10 minutes, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 600_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 600_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(h) = self.inner.lock() else {
            return LatencySnapshot { p50_ms: None, p95_ms: None, p99_ms: None, samples: 0 };
        };
        if h.len() == 0 {
            return LatencySnapshot { p50_ms: None, p95_ms: None, p99_ms: None, samples: 0 };
        }
        let ms = |q: f64| Some(h.value_at_quantile(q) as f64 / 1_000.0);
        LatencySnapshot {
            p50_ms: ms(0.5),
            p95_ms: ms(0.95),
            p99_ms: ms(0.99),
            samples: h.len(),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
