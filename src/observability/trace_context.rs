//! Trace correlation for log records.
//!
//! [`TraceAwareFormat`] decorates any `tracing-subscriber` event formatter.
//! When the event belongs to a span with a valid OpenTelemetry context,
//! `trace_id` and `span_id` are added to the formatted record. An explicit
//! `parent:` takes precedence over the current span.
//! Otherwise the inner formatter's output is passed through byte for byte.
//! Level filtering happens before formatting and is untouched.

use std::fmt::{self, Write as _};

use opentelemetry::trace::{SpanId, TraceContextExt, TraceId};
use tracing::{Event, Subscriber};
use tracing_opentelemetry::OtelData;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::{LookupSpan, SpanRef};

/// Correlation identifiers of the span an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceIds {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl TraceIds {
    /// Identifiers recorded on `span` by the OpenTelemetry layer.
    ///
    /// Spans created while no OpenTelemetry layer is installed yield `None`.
    pub fn of_span<S>(span: &SpanRef<'_, S>) -> Option<Self>
    where
        S: for<'a> LookupSpan<'a>,
    {
        let extensions = span.extensions();
        let data = extensions.get::<OtelData>()?;

        let trace_id = if data.parent_cx.has_active_span() {
            data.parent_cx.span().span_context().trace_id()
        } else {
            data.builder.trace_id?
        };
        let span_id = data.builder.span_id?;

        (trace_id != TraceId::INVALID && span_id != SpanId::INVALID)
            .then_some(TraceIds { trace_id, span_id })
    }
}

/// Event formatter decorator adding `trace_id` / `span_id` fields.
#[derive(Debug, Clone, Default)]
pub struct TraceAwareFormat<F> {
    inner: F,
}

impl<F> TraceAwareFormat<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<S, N, F> FormatEvent<S, N> for TraceAwareFormat<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let Some(ids) = ctx.parent_span().and_then(|span| TraceIds::of_span(&span)) else {
            return self.inner.format_event(ctx, writer, event);
        };

        let mut record = String::new();
        self.inner.format_event(ctx, Writer::new(&mut record), event)?;
        attach_ids(&mut record, &ids);
        writer.write_str(&record)
    }
}

/// Splice the identifiers into one formatted record.
///
/// JSON objects gain two members before the closing brace; any other
/// encoding gets `key=value` pairs appended. A trailing newline is kept.
fn attach_ids(record: &mut String, ids: &TraceIds) {
    let body_len = record.trim_end_matches(['\n', '\r']).len();
    let line_end = record.split_off(body_len);

    let trimmed = record.trim_end();
    let is_object = trimmed.starts_with('{') && trimmed.ends_with('}');
    let object_end = trimmed.len().saturating_sub(1);
    if is_object {
        record.truncate(object_end);
        let empty_object = record.trim_end() == "{";
        if !empty_object {
            record.push(',');
        }
        let _ = write!(
            record,
            "\"trace_id\":\"{}\",\"span_id\":\"{}\"}}",
            ids.trace_id, ids.span_id
        );
    } else {
        let _ = write!(record, " trace_id={} span_id={}", ids.trace_id, ids.span_id);
    }

    record.push_str(&line_end);
}
