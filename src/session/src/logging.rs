use std::fmt;

use ansi_term::Colour;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Overrides the configured log level.
pub const LOG_ENV: &str = "VN_LOG";

struct FmtLevel<'a> {
    level: &'a Level,
    ansi: bool,
}

const TRACE_STR: &str = "TRACE";
const DEBUG_STR: &str = "DEBUG";
const INFO_STR: &str = " INFO";
const WARN_STR: &str = " WARN";
const ERROR_STR: &str = "ERROR";

impl<'a> fmt::Display for FmtLevel<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (colour, s) = match *self.level {
            Level::TRACE => (Colour::Purple, TRACE_STR),
            Level::DEBUG => (Colour::Blue, DEBUG_STR),
            Level::INFO => (Colour::Green, INFO_STR),
            Level::WARN => (Colour::Yellow, WARN_STR),
            Level::ERROR => (Colour::Red, ERROR_STR),
        };
        if self.ansi {
            write!(f, "{}", colour.paint(s))
        } else {
            f.pad(s)
        }
    }
}

struct SessionFormatter {
    ansi: bool,
}

impl<S, N> FormatEvent<S, N> for SessionFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        use chrono::Utc;
        let metadata = event.metadata();
        let level = FmtLevel {
            level: metadata.level(),
            ansi: self.ansi && writer.has_ansi_escapes(),
        };

        write!(
            writer,
            "[{} {} {}:{}] ",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            level,
            metadata.file().unwrap_or("<unnamed>"),
            metadata.line().unwrap_or(0),
        )?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber. `level` is the default directive,
/// [`LOG_ENV`] takes precedence. Later calls are no-ops.
pub fn init_log(level: &str, ansi: bool) -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.parse()?)
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(SessionFormatter { ansi })
        .with_ansi(ansi)
        .with_filter(env_filter);

    if tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        tracing::info!("tracing-log initialized");
    }
    Ok(())
}
