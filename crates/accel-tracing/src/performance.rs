//! Performance spans and transfer events
//!
//! ```rust
//! use accel_tracing::performance::{record_transfer, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("offload_execute", Some(100));
//! // ... copy in, trigger, poll, copy out ...
//! drop(span); // logged only if it took at least 100μs
//!
//! record_transfer("host_to_device", 4096, 12);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Global threshold in microseconds; `u64::MAX` means unset.
static GLOBAL_THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Apply the performance settings of a [`TracingConfig`](crate::TracingConfig).
pub fn configure(enabled: bool, threshold_us: Option<u64>) {
    ENABLED.store(enabled, Ordering::Relaxed);
    GLOBAL_THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Whether performance spans currently log anything.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

fn global_threshold() -> Option<u64> {
    match GLOBAL_THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        threshold => Some(threshold),
    }
}

/// RAII timer that logs its duration on drop.
///
/// The span logs when performance tracing is enabled and the duration reaches the
/// span's own threshold, or the global threshold when the span has none.
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Start timing `name`.
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        Self {
            threshold_us,
            start: Instant::now(),
            span: tracing::debug_span!("perf", name = %name),
        }
    }

    /// Microseconds since the span started.
    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Enter the underlying tracing span.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !is_enabled() {
            return;
        }

        let elapsed_us = self.elapsed_us();
        let threshold = self.threshold_us.or_else(global_threshold);
        if threshold.map_or(true, |t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record a host↔device copy with its effective bandwidth.
pub fn record_transfer(direction: &str, bytes: usize, duration_us: u64) {
    let bandwidth_mb_s = if duration_us == 0 {
        0.0
    } else {
        bytes as f64 / duration_us as f64
    };
    tracing::debug!(
        direction = direction,
        bytes = bytes,
        duration_us = duration_us,
        bandwidth_mb_s = bandwidth_mb_s,
        "transfer_complete"
    );
}
