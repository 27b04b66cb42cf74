//! Provider round-trip latency, shared between the client (writer) and the
//! jobs that log it after each scan (readers). Values are milliseconds.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

pub struct LatencyStats {
    histogram: Mutex<Histogram<u64>>,
}

impl LatencyStats {
    /// 1ms to 10 minutes at 3 significant figures.
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, 600_000, 3).expect("valid histogram bounds");
        Self { histogram: Mutex::new(histogram) }
    }

    pub fn record(&self, elapsed: Duration) {
        let ms = (elapsed.as_millis() as u64).clamp(1, 600_000);
        if let Ok(mut h) = self.histogram.lock() {
            let _ = h.record(ms);
        }
    }

    /// `None` until the first sample arrives.
    pub fn summary(&self) -> Option<LatencySummary> {
        let h = self.histogram.lock().ok()?;
        if h.len() == 0 {
            return None;
        }
        Some(LatencySummary {
            samples: h.len(),
            p50_ms: h.value_at_quantile(0.50),
            p95_ms: h.value_at_quantile(0.95),
            p99_ms: h.value_at_quantile(0.99),
            max_ms: h.max(),
        })
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_summary() {
        assert!(LatencyStats::new().summary().is_none());
    }

    #[test]
    fn percentiles_reflect_samples() {
        let stats = LatencyStats::new();
        for ms in 1..=100 {
            stats.record(Duration::from_millis(ms));
        }
        let s = stats.summary().unwrap();
        assert_eq!(s.samples, 100);
        assert!((49..=51).contains(&s.p50_ms));
        assert!(s.p99_ms >= 98);
        assert_eq!(s.max_ms, 100);
    }

    #[test]
    fn sub_millisecond_calls_count_as_one() {
        let stats = LatencyStats::new();
        stats.record(Duration::from_micros(20));
        assert_eq!(stats.summary().unwrap().max_ms, 1);
    }
}
