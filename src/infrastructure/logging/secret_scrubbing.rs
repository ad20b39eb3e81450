//! Field-level secret scrubbing (§4.11): redacts values for fields named in
//! an integration's declared `sensitive` keys plus a built-in deny-list,
//! applied at the event-field level rather than by pattern-matching
//! formatted text.
//!
//! A `tracing_subscriber::Layer` runs in parallel with the formatting layer
//! and receives the same borrowed `Event` — it has no way to change what a
//! downstream layer goes on to format. Redaction has to happen inside field
//! formatting itself, so this module exports two `tracing_subscriber::fmt`
//! hooks instead: [`RedactingFieldFormat`] for `.fmt_fields(...)` (pretty/full
//! output, which does consult the configured `FormatFields`) and
//! [`RedactingJsonFormat`] for `.event_format(...)` (the built-in `.json()`
//! formatter ignores `fmt_fields` entirely and serializes event fields
//! itself, so JSON output needs its own `FormatEvent`).

use std::fmt;

use serde_json::{Map, Value as JsonValue};
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::field::RecordFields;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const BUILTIN_DENY_LIST: &[&str] = &["client_secret", "access_token", "authorization"];
const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Default)]
pub struct SensitiveKeys {
    keys: Vec<String>,
}

impl SensitiveKeys {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    fn is_sensitive(&self, field_name: &str) -> bool {
        BUILTIN_DENY_LIST.contains(&field_name) || self.keys.iter().any(|k| k == field_name)
    }
}

/// Collects every recorded field into `(name, formatted value)` pairs,
/// substituting [`REDACTED`] for anything [`SensitiveKeys::is_sensitive`]
/// flags, before any layer gets a chance to write it out.
struct CollectingVisitor<'a> {
    sensitive: &'a SensitiveKeys,
    values: Vec<(String, String)>,
}

impl<'a> CollectingVisitor<'a> {
    fn new(sensitive: &'a SensitiveKeys) -> Self {
        Self { sensitive, values: Vec::new() }
    }

    fn push(&mut self, field: &Field, formatted: String) {
        let value = if self.sensitive.is_sensitive(field.name()) { REDACTED.to_string() } else { formatted };
        self.values.push((field.name().to_string(), value));
    }
}

impl Visit for CollectingVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }
}

/// `FormatFields` implementation for the pretty/full formatters: writes
/// `key=value` pairs space-separated, same shape as `DefaultFields`, with
/// sensitive values replaced.
#[derive(Debug, Clone, Default)]
pub struct RedactingFieldFormat {
    sensitive: SensitiveKeys,
}

impl RedactingFieldFormat {
    pub fn new(sensitive_keys: Vec<String>) -> Self {
        Self { sensitive: SensitiveKeys::new(sensitive_keys) }
    }
}

impl<'writer> FormatFields<'writer> for RedactingFieldFormat {
    fn format_fields<R: RecordFields>(&self, mut writer: Writer<'writer>, fields: R) -> fmt::Result {
        let mut visitor = CollectingVisitor::new(&self.sensitive);
        fields.record(&mut visitor);
        for (i, (name, value)) in visitor.values.iter().enumerate() {
            if i > 0 {
                write!(writer, " ")?;
            }
            write!(writer, "{name}={value}")?;
        }
        Ok(())
    }
}

/// `FormatEvent` implementation replacing the built-in `.json()` formatter,
/// which serializes event fields itself and ignores any configured
/// `FormatFields`.
#[derive(Debug, Clone, Default)]
pub struct RedactingJsonFormat {
    sensitive: SensitiveKeys,
}

impl RedactingJsonFormat {
    pub fn new(sensitive_keys: Vec<String>) -> Self {
        Self { sensitive: SensitiveKeys::new(sensitive_keys) }
    }
}

impl<S, N> FormatEvent<S, N> for RedactingJsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &tracing::Event<'_>) -> fmt::Result {
        let mut visitor = CollectingVisitor::new(&self.sensitive);
        event.record(&mut visitor);

        let metadata = event.metadata();
        let mut fields = Map::new();
        for (name, value) in visitor.values {
            fields.insert(name, JsonValue::String(value));
        }

        let mut object = Map::new();
        object.insert("level".to_string(), JsonValue::String(metadata.level().to_string()));
        object.insert("target".to_string(), JsonValue::String(metadata.target().to_string()));
        object.insert("fields".to_string(), JsonValue::Object(fields));

        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<JsonValue> = scope.from_root().map(|span| JsonValue::String(span.name().to_string())).collect();
            object.insert("spans".to_string(), JsonValue::Array(spans));
        }

        let line = serde_json::to_string(&JsonValue::Object(object)).map_err(|_| fmt::Error)?;
        writeln!(writer, "{line}")
    }
}
