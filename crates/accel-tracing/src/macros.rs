//! Instrumentation macros

/// Start a [`PerformanceSpan`](crate::performance::PerformanceSpan), optionally with
/// extra fields recorded on a debug span.
///
/// ```rust
/// use accel_tracing::perf_span;
///
/// {
///     let _span = perf_span!("copy_in", bytes = 4096);
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        $crate::__tracing::debug!(span = $name, $($field = $value),+, "perf_span_start");
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Emit a debug event tagged with `event = $name`.
///
/// ```rust
/// use accel_tracing::perf_event;
///
/// perf_event!("poll_complete", polls = 12, elapsed_us = 40);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        $crate::__tracing::debug!(event = $name, $($field = $value),+)
    };
}

/// Time a block, returning `(result, duration_us)`.
///
/// ```rust
/// use accel_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=4).sum::<u64>() });
/// assert_eq!(sum, 10);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::__tracing::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}
