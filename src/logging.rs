use crate::log_rotation::{LogRotationConfig, LogRotationManager};
use crate::redaction::RedactingWriter;
use serde_json::{json, Value};
use std::io::Write;
use std::panic;
use std::path::Path;
use tracing::{error, Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

pub const LOG_FILE_PREFIX: &str = "chatrelay.log";
pub const EVENTS_FILE_PREFIX: &str = "events.json";

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Installs the global subscriber: rolling text log, stderr, NDJSON events and
/// span traces. Every sink goes through `RedactingWriter`. The returned guards
/// must live as long as the process.
pub fn init_tracing(log_dir: &Path) -> Vec<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "chatrelay=debug".into(),
    };

    let _ = std::fs::create_dir_all(log_dir);
    let retention = LogRotationManager::new(LogRotationConfig::default());
    let _ = retention.check_and_rotate(log_dir, LOG_FILE_PREFIX);
    let _ = retention.check_and_rotate(log_dir, EVENTS_FILE_PREFIX);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let events_appender = tracing_appender::rolling::daily(log_dir, EVENTS_FILE_PREFIX);
    let (events_writer, events_guard) = tracing_appender::non_blocking(events_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(move || RedactingWriter::new(file_writer.clone()))
                .with_ansi(false),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(|| RedactingWriter::new(std::io::stderr())))
        .with(NdjsonLayer::new(RedactingWriter::new(events_writer)))
        .with(tracing_error::ErrorLayer::default())
        .init();

    vec![file_guard, events_guard]
}

/// Writes one JSON object per event, with the enclosing span names and fields.
pub struct NdjsonLayer<W: Write + Send + Sync + 'static> {
    writer: std::sync::Mutex<W>,
}

impl<W: Write + Send + Sync + 'static> NdjsonLayer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: std::sync::Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for NdjsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + Send + Sync + 'static,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: Context<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else { return };
        let mut fields = json!({});
        attrs.record(&mut JsonVisitor(&mut fields));
        span.extensions_mut().insert(SpanFields(fields));
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = json!({});
        event.record(&mut JsonVisitor(&mut fields));

        let mut spans = Vec::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                let span_fields = span
                    .extensions()
                    .get::<SpanFields>()
                    .map(|f| f.0.clone())
                    .unwrap_or(Value::Null);
                spans.push(json!({ "name": span.name(), "fields": span_fields }));
            }
        }

        let output = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": event.metadata().level().to_string(),
            "target": event.metadata().target(),
            "spans": spans,
            "fields": fields,
        });

        if let Ok(mut w) = self.writer.lock() {
            let _ = writeln!(w, "{}", output);
        }
    }
}

struct SpanFields(Value);

struct JsonVisitor<'a>(&'a mut Value);

impl tracing::field::Visit for JsonVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0[field.name()] = json!(format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0[field.name()] = json!(value);
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0[field.name()] = json!(value);
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0[field.name()] = json!(value);
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0[field.name()] = json!(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::prelude::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match self.0.lock() {
                Ok(mut b) => b.extend_from_slice(buf),
                Err(_) => return Err(std::io::Error::other("poisoned")),
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ndjson_layer_records_span_fields() {
        let buf = SharedBuf::default();
        let subscriber = tracing_subscriber::registry().with(NdjsonLayer::new(buf.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("session", operator_id = 42);
            let _g = span.enter();
            tracing::info!(channel = "streamer", "joined");
        });

        let raw = match buf.0.lock() {
            Ok(b) => String::from_utf8_lossy(&b).to_string(),
            Err(_) => panic!("buffer poisoned"),
        };
        let line: Value = match serde_json::from_str(raw.trim()) {
            Ok(v) => v,
            Err(e) => panic!("not json: {} ({})", raw, e),
        };
        assert_eq!(line["level"], "INFO");
        assert_eq!(line["fields"]["channel"], "streamer");
        assert_eq!(line["spans"][0]["name"], "session");
        assert_eq!(line["spans"][0]["fields"]["operator_id"], 42);
    }

    #[test]
    fn test_text_layer_redacts_tokens() {
        let buf = SharedBuf::default();
        let sink = buf.clone();
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_writer(move || RedactingWriter::new(sink.clone()))
                .with_ansi(false),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(
                "Polling failed: error sending request for url (https://api.telegram.org/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw/getUpdates)"
            );
        });

        let raw = match buf.0.lock() {
            Ok(b) => String::from_utf8_lossy(&b).to_string(),
            Err(_) => panic!("buffer poisoned"),
        };
        assert!(raw.contains("Polling failed"));
        assert!(!raw.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw"));
    }
}
