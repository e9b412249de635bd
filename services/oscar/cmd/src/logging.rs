//! Console log formatting for the oscar binary.
//!
//! Events may carry a `component` field naming the subsystem that produced
//! them; it is printed between the level and the message. Any other
//! structured fields are folded into a trailing `key=value` list, so
//! `warn!(conn = 3, "peer closed")` comes out as one line.

use std::fmt::{self, Write as _};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[90m";

/// Line-oriented event formatter: `HH:MM:SS.mmm LEVEL [component] message k=v`.
pub struct OscarLogFormatter {
    color: bool,
}

#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

impl OscarLogFormatter {
    pub fn new() -> Self {
        // Dumb terminals and redirected output get plain text.
        let term = std::env::var("TERM").unwrap_or_default();
        Self {
            color: !term.is_empty() && term != "dumb",
        }
    }

    fn level_color(&self, level: &Level) -> &'static str {
        if !self.color {
            return "";
        }
        match *level {
            Level::ERROR => "\x1b[91m",
            Level::WARN => "\x1b[93m",
            Level::INFO => "\x1b[32m",
            Level::DEBUG | Level::TRACE => DIM,
        }
    }
}

impl Default for OscarLogFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for OscarLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = LineFields::default();
        event.record(&mut fields);

        let level = event.metadata().level();
        let reset = if self.color { RESET } else { "" };
        let dim = if self.color { DIM } else { "" };

        write!(
            writer,
            "{}{}{} {}{:>5}{} ",
            dim,
            chrono::Local::now().format("%H:%M:%S%.3f"),
            reset,
            self.level_color(level),
            level.as_str(),
            reset,
        )?;
        if let Some(component) = &fields.component {
            write!(writer, "[{}] ", component)?;
        }
        write!(writer, "{}", fields.message)?;
        if !fields.extra.is_empty() {
            write!(writer, " {}{}{}", dim, fields.extra, reset)?;
        }
        writeln!(writer)
    }
}

/// Pulls out `message` and `component`, collecting everything else as
/// space-separated `key=value` pairs in record order.
#[derive(Default)]
struct LineFields {
    message: String,
    component: Option<String>,
    extra: String,
}

impl LineFields {
    fn push_extra(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.extra.is_empty() {
            self.extra.push(' ');
        }
        let _ = write!(self.extra, "{}={}", name, value);
    }
}

impl tracing::field::Visit for LineFields {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            _ => self.push_extra(field.name(), format_args!("{}", value)),
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "component" => {
                self.component = Some(format!("{:?}", value).trim_matches('"').to_string())
            }
            _ => self.push_extra(field.name(), format_args!("{:?}", value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::subscriber::with_default;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture_line(emit: impl FnOnce()) -> String {
        let sink = Capture::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .event_format(OscarLogFormatter { color: false })
            .with_writer(move || writer.clone())
            .finish();
        with_default(subscriber, emit);
        let out = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        out
    }

    #[test]
    fn test_component_and_fields_on_one_line() {
        let out = capture_line(|| {
            tracing::info!(component = "chatnav", rooms = 3, "rights granted");
        });
        assert!(out.contains(" INFO [chatnav] rights granted rooms=3"), "{out}");
    }

    #[test]
    fn test_plain_event_has_no_component_bracket() {
        let out = capture_line(|| {
            tracing::warn!("peer closed");
        });
        assert!(out.contains(" WARN peer closed"), "{out}");
        assert!(!out.contains('['), "{out}");
    }
}
