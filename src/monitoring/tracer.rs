/*!
 * Tracing
 * Structured logging for sandbox steps using the tracing crate
 *
 * Features:
 * - Human-readable or JSON-formatted logs on stderr
 * - Timed spans around privileged steps with slow-step warnings
 */

use std::time::{Duration, Instant};
use tracing::{debug, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Privileged steps slower than this are reported at warn level
const SLOW_STEP: Duration = Duration::from_millis(250);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: warn)
/// - VELEN_TRACE_JSON: Enable JSON output (default: false)
///
/// Logs always go to stderr so command output on stdout stays untouched.
/// Calling this twice is harmless.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let use_json = std::env::var("VELEN_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_span_events(FmtSpan::NONE)
                    .compact(),
            )
            .try_init()
    };

    if result.is_ok() {
        debug!(json = use_json, "Structured tracing initialized");
    }
}

/// Timed span for one privileged step (a mount, an unmount, a setuid)
pub struct StepSpan {
    span: tracing::Span,
    start: Instant,
    step: &'static str,
    target: String,
}

impl StepSpan {
    pub fn new(step: &'static str, target: impl Into<String>) -> Self {
        let target = target.into();
        let span = span!(Level::DEBUG, "step", step = step, target = %target);
        Self {
            span,
            start: Instant::now(),
            step,
            target,
        }
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for StepSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();

        if duration > SLOW_STEP {
            warn!(
                step = self.step,
                target = %self.target,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow step detected"
            );
        } else {
            debug!(
                step = self.step,
                target = %self.target,
                duration_us = duration.as_micros() as u64,
                "step completed"
            );
        }
    }
}

/// Convenience constructor used at call sites
pub fn span_step(step: &'static str, target: impl Into<String>) -> StepSpan {
    StepSpan::new(step, target)
}
