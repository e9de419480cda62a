//! Logging setup for Strix.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter producing `<timestamp> <LEVEL> <target>: fields` lines,
/// one event per line so capture replays stay greppable.
pub struct StrixFormatter;

impl<S, N> FormatEvent<S, N> for StrixFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write!(
            writer,
            "{} {:>5} {}: ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"),
            meta.level(),
            meta.target(),
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber, logging to `log_file` when given and
/// readable, stderr otherwise.
pub fn init_logging(log_level: Level, log_file: Option<&str>) {
    if let Some(path) = log_file {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(path))
        {
            Ok(file) => {
                let subscriber = tracing_subscriber::fmt()
                    .with_max_level(log_level)
                    .event_format(StrixFormatter)
                    .with_writer(Arc::new(file))
                    .finish();
                tracing::subscriber::set_global_default(subscriber)
                    .expect("failed to set global default subscriber");
                return;
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path, e);
            }
        }
    }

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .event_format(StrixFormatter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set global default subscriber");
}
