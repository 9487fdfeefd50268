//! Telemetry sink used by the reconciliation engine
//!
//! Sink calls never fail and never block the caller.

pub mod otel;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, info_span, Span};

/// Key/value attributes attached to events and spans
pub type Attributes<'a> = &'a [(&'static str, String)];

/// Records discrete events and timed spans
pub trait TelemetrySink: Send + Sync {
    fn record_event(&self, name: &str, attributes: Attributes<'_>);

    fn start_span(&self, name: &str, attributes: Attributes<'_>) -> SpanGuard;
}

type EndHook = Box<dyn FnOnce(Duration) + Send>;

/// A started span; ends on [`SpanGuard::end`] or when dropped
pub struct SpanGuard {
    span: Span,
    started: Instant,
    on_end: Option<EndHook>,
}

impl SpanGuard {
    #[must_use]
    pub fn new(span: Span) -> Self {
        Self {
            span,
            started: Instant::now(),
            on_end: None,
        }
    }

    /// Run `hook` with the elapsed time when the span ends
    #[must_use]
    pub fn on_end(mut self, hook: impl FnOnce(Duration) + Send + 'static) -> Self {
        self.on_end = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// End the span and return its duration
    pub fn end(mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if let Some(hook) = self.on_end.take() {
            hook(elapsed);
        }
        elapsed
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some(hook) = self.on_end.take() {
            hook(self.started.elapsed());
        }
    }
}

fn render_attributes(attributes: Attributes<'_>) -> String {
    attributes
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sink that emits into the `tracing` pipeline and counts events by name
#[derive(Debug, Default)]
pub struct TracingTelemetry {
    counters: DashMap<String, u64>,
}

impl TracingTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Event counts, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

impl TelemetrySink for TracingTelemetry {
    fn record_event(&self, name: &str, attributes: Attributes<'_>) {
        *self.counters.entry(name.to_string()).or_insert(0) += 1;
        info!(
            target: "analysis_controller::telemetry",
            event = name,
            attributes = %render_attributes(attributes),
            "telemetry event"
        );
    }

    fn start_span(&self, name: &str, attributes: Attributes<'_>) -> SpanGuard {
        let span = info_span!(
            target: "analysis_controller::telemetry",
            "telemetry_span",
            otel.name = %name,
            attributes = %render_attributes(attributes),
            elapsed_ms = tracing::field::Empty,
        );
        let recorded = span.clone();
        SpanGuard::new(span).on_end(move |elapsed| {
            recorded.record("elapsed_ms", u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        })
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_event(&self, _name: &str, _attributes: Attributes<'_>) {}

    fn start_span(&self, _name: &str, _attributes: Attributes<'_>) -> SpanGuard {
        SpanGuard::new(Span::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_events_are_counted_by_name() {
        let telemetry = TracingTelemetry::new();
        telemetry.record_event("analysis.succeeded", &[("kind", "AISecretsAudit".to_string())]);
        telemetry.record_event("analysis.succeeded", &[]);
        telemetry.record_event("analysis.failed", &[]);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot["analysis.succeeded"], 2);
        assert_eq!(snapshot["analysis.failed"], 1);
    }

    #[test]
    fn test_end_hook_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let guard = SpanGuard::new(Span::none()).on_end(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        guard.end();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_guard_runs_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        {
            let _guard = NoopTelemetry.start_span("analyze", &[]).on_end(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_render_attributes() {
        let rendered = render_attributes(&[
            ("kind", "AIManifestAnalysis".to_string()),
            ("backend", "llm".to_string()),
        ]);
        assert_eq!(rendered, "kind=AIManifestAnalysis backend=llm");
    }
}
