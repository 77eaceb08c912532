use std::fmt::{self as stdfmt, Display, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Result;
use rv_config::{LogFormat, LoggingConfig};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormattedFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

// ---------------------------------------------------------------------------
// FileFields: keeps span field caches of the file layer apart from stderr's
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FileFields(DefaultFields);

impl<'writer> fmt::FormatFields<'writer> for FileFields {
    fn format_fields<R: tracing_subscriber::field::RecordFields>(
        &self,
        writer: Writer<'writer>,
        fields: R,
    ) -> stdfmt::Result {
        self.0.format_fields(writer, fields)
    }
}

// ---------------------------------------------------------------------------
// DomainFormat
// ---------------------------------------------------------------------------

/// Plain-text event format that lifts the `domain` field into a `[domain]`
/// prefix:
///
/// ```text
/// 2026-10-17T09:12:44.120Z  INFO [pipe] run finished events_in=3 events_out=2
/// ```
///
/// Events without a domain (from dependencies, or `rv_core`'s plain
/// `tracing` calls) are printed without a prefix.
#[derive(Default)]
pub struct DomainFormat {
    timer: SystemTime,
}

impl<S, N> FormatEvent<S, N> for DomainFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> fmt::FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let ansi = writer.has_ansi_escapes();

        if self.timer.format_time(&mut writer).is_err() {
            writer.write_str("<unknown time>")?;
        }

        let level = *event.metadata().level();
        writer.write_char(' ')?;
        styled(&mut writer, ansi, level_style(level), format_args!("{level:>5}"))?;
        writer.write_char(' ')?;

        let mut fields = EventFields::default();
        event.record(&mut fields);

        if let Some(domain) = &fields.domain {
            styled(&mut writer, ansi, "1;36", format_args!("[{domain}]"))?;
            writer.write_char(' ')?;
        }

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                styled(&mut writer, ansi, "1", span.name())?;
                let ext = span.extensions();
                match ext.get::<FormattedFields<N>>() {
                    Some(recorded) if !recorded.is_empty() => write!(writer, "{{{recorded}}}: ")?,
                    _ => writer.write_str(": ")?,
                }
            }
        }

        writer.write_str(&fields.message)?;
        if !fields.rest.is_empty() {
            writer.write_char(' ')?;
            styled(&mut writer, ansi, "3", fields.rest.join(" "))?;
        }
        writeln!(writer)
    }
}

fn level_style(level: Level) -> &'static str {
    match level {
        Level::ERROR => "31",
        Level::WARN => "33",
        Level::INFO => "32",
        Level::DEBUG => "34",
        Level::TRACE => "35",
    }
}

fn styled(writer: &mut Writer<'_>, ansi: bool, style: &str, text: impl Display) -> stdfmt::Result {
    if ansi {
        write!(writer, "\x1b[{style}m{text}\x1b[0m")
    } else {
        write!(writer, "{text}")
    }
}

/// Splits an event into its domain, its message and everything else.
#[derive(Default)]
struct EventFields {
    domain: Option<String>,
    message: String,
    rest: Vec<String>,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "domain" => self.domain = Some(value.to_string()),
            "message" => self.message = value.to_string(),
            name => self.rest.push(format!("{name}={value:?}")),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        match field.name() {
            "domain" => self.domain = Some(format!("{value:?}").trim_matches('"').to_string()),
            "message" => {
                let _ = write!(self.message, "{value:?}");
            }
            name => self.rest.push(format!("{name}={value:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter directives for `config`: the global level followed by the module
/// overrides in name order.
pub fn log_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    let mut directives = config.level.clone();
    for (module, level) in modules {
        let _ = write!(directives, ",{module}={level}");
    }
    directives
}

/// Where the log file lives; relative paths hang off `base_dir`.
pub fn resolve_log_file(file: &Path, base_dir: &Path) -> PathBuf {
    if file.is_relative() {
        base_dir.join(file)
    } else {
        file.to_path_buf()
    }
}

fn output_layer<W>(format: LogFormat, writer: W, to_file: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match (format, to_file) {
        // JSON keeps `domain` as an ordinary key for consumers to query.
        (LogFormat::Json, _) => fmt::layer()
            .json()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        (LogFormat::Plain, false) => fmt::layer()
            .event_format(DomainFormat::default())
            .with_writer(writer)
            .boxed(),
        (LogFormat::Plain, true) => fmt::layer()
            .event_format(DomainFormat::default())
            .fmt_fields(FileFields::default())
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Install the global `tracing` subscriber described by `config`.
///
/// Logs always go to stderr, since stdout carries pipeline output. With a
/// `file` configured they are also written there through a non-blocking
/// appender, and the returned [`WorkerGuard`] must be held until exit to
/// flush it. `RUST_LOG` overrides the configured directives.
pub fn init_tracing(config: &LoggingConfig, base_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directives = log_directives(config);
        EnvFilter::try_new(&directives)
            .map_err(|e| anyhow::anyhow!("invalid log filter '{directives}': {e}"))?
    };

    let mut layers = vec![output_layer(config.format, std::io::stderr, false)];
    let mut guard = None;
    if let Some(file) = &config.file {
        let resolved = resolve_log_file(file, base_dir);
        let dir = resolved
            .parent()
            .ok_or_else(|| anyhow::anyhow!("log file path has no parent directory"))?;
        let name = resolved
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("log file path has no file name"))?;
        std::fs::create_dir_all(dir)?;
        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        layers.push(output_layer(config.format, writer, true));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    Ok(guard)
}
