//! Tracing setup shared by the accel-offload workspace.
//!
//! Binaries, integration tests, and host pipelines embedding the offload stage install
//! their `tracing` subscriber through this crate so that device bring-up, transfer and
//! poll events are formatted the same way everywhere.
//!
//! ```rust,no_run
//! use accel_tracing::{init_global_tracing, TracingConfig};
//!
//! init_global_tracing(&TracingConfig::from_env()).expect("tracing already installed");
//! ```

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;
use std::fmt;

pub use tracing::{debug, error, info, trace, warn};

#[doc(hidden)]
pub use tracing as __tracing;

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Output format of the formatter layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    /// Multi-line human readable output.
    Pretty,
    /// Single-line human readable output.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl TracingOutput {
    /// Parse the value of `ACCEL_TRACING_FORMAT`.
    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Configuration of the shared tracing subscriber.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Filter directives (e.g. `accel_offload=debug,info`). Falls back to `RUST_LOG`
    /// and then [`default_directive`](Self::default_directive) when absent.
    pub directives: Option<String>,
    /// Directive used when nothing else resolves.
    pub default_directive: String,
    /// Show event targets (module paths).
    pub include_targets: bool,
    /// ANSI colours. Ignored for JSON output.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Formatter output.
    pub output: TracingOutput,
    /// Emit [`PerformanceSpan`](performance::PerformanceSpan) timings.
    pub enable_performance_tracing: bool,
    /// Only log performance spans at least this long (microseconds).
    pub performance_threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for local development.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            enable_performance_tracing: cfg!(debug_assertions),
            performance_threshold_us: None,
        }
    }

    /// JSON without colours for CI and log collection.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            enable_performance_tracing: false,
            ..Self::for_local()
        }
    }

    /// Verbose offload tracing: every register poke and transfer plus span timings.
    pub fn for_device_debug() -> Self {
        Self {
            directives: Some("accel_offload=trace,accel_backends=trace".to_string()),
            ansi: false,
            span_events: FmtSpan::CLOSE,
            output: TracingOutput::Compact,
            enable_performance_tracing: true,
            ..Self::for_local()
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `ACCEL_TRACING_PROFILE` - `local` (default), `ci`, or `device-debug`
    /// - `ACCEL_TRACING_DIRECTIVES` - filter directives
    /// - `ACCEL_TRACING_FORMAT` - `pretty`, `compact`, or `json`
    /// - `ACCEL_PERF_TRACING` - `true`/`1`/`yes` to enable performance spans
    /// - `ACCEL_PERF_THRESHOLD_US` - minimum performance span duration to log
    pub fn from_env() -> Self {
        let profile = env::var("ACCEL_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "device-debug" | "device_debug" => Self::for_device_debug(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("ACCEL_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Some(output) = env::var("ACCEL_TRACING_FORMAT")
            .ok()
            .and_then(|value| TracingOutput::from_env_value(&value))
        {
            config.output = output;
            if output == TracingOutput::Json {
                config.ansi = false;
            }
        }

        if let Ok(flag) = env::var("ACCEL_PERF_TRACING") {
            config.enable_performance_tracing =
                matches!(flag.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }

        if let Some(threshold) = env::var("ACCEL_PERF_THRESHOLD_US")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            config.performance_threshold_us = Some(threshold);
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug)]
pub enum TracingSetupError {
    /// Directive string could not be parsed.
    InvalidFilter(String),
    /// A global subscriber is already installed.
    SubscriberInit(tracing_subscriber::util::TryInitError),
}

impl fmt::Display for TracingSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingSetupError::InvalidFilter(msg) => write!(f, "invalid tracing directive: {msg}"),
            TracingSetupError::SubscriberInit(err) => {
                write!(f, "failed to install global tracing subscriber: {err}")
            }
        }
    }
}

impl std::error::Error for TracingSetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TracingSetupError::SubscriberInit(err) => Some(err),
            TracingSetupError::InvalidFilter(_) => None,
        }
    }
}

/// Build a subscriber from `config` without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    performance::configure(config.enable_performance_tracing, config.performance_threshold_us);
    Ok(Registry::default().with(format_layer(config)).with(filter))
}

fn format_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let span_events = config.span_events.clone();
    match config.output {
        TracingOutput::Pretty => Box::new(
            tracing_fmt::layer()
                .pretty()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(span_events),
        ),
        TracingOutput::Compact => Box::new(
            tracing_fmt::layer()
                .compact()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(span_events),
        ),
        TracingOutput::Json => Box::new(
            tracing_fmt::layer()
                .json()
                .with_target(config.include_targets)
                .with_ansi(false)
                .with_span_events(span_events),
        ),
    }
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)
}

/// Install a test-friendly subscriber, ignoring the error if one is already set.
pub fn init_test_tracing() {
    let config = TracingConfig {
        ansi: false,
        output: TracingOutput::Compact,
        ..TracingConfig::for_local()
    };
    let _ = init_global_tracing(&config);
}
