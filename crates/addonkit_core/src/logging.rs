//! Rolling file logs for addons.
//!
//! # Responsibility
//! - Start the `flexi_logger` backend at most once per process.
//! - Route panics into the log and shape panic payloads for log lines.
//!
//! # Invariants
//! - `init_logging` is idempotent for an identical level and directory and
//!   rejects any later change of either.
//! - Nothing here panics; failures come back as readable strings.
//!
//! # See also
//! - `config.rs` for the environment variables feeding `init_logging`.

use flexi_logger::{
    Cleanup, Criterion, DeferredNow, FileSpec, LogSpecification, Logger, LoggerHandle, Naming,
    WriteMode,
};
use log::{error, info, LevelFilter, Record};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;

const FILE_BASENAME: &str = "addonkit";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_FILES: usize = 5;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";
pub const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

/// Accepted spellings, first match wins. The first entry per filter is canonical.
const LEVELS: &[(&str, LevelFilter)] = &[
    ("trace", LevelFilter::Trace),
    ("debug", LevelFilter::Debug),
    ("info", LevelFilter::Info),
    ("warn", LevelFilter::Warn),
    ("warning", LevelFilter::Warn),
    ("error", LevelFilter::Error),
];

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: Once = Once::new();

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    filter: LevelFilter,
    dir: PathBuf,
}

impl LogSettings {
    fn parse(level: &str, dir: &str) -> Result<Self, String> {
        Ok(Self {
            filter: parse_filter(level)?,
            dir: absolute_dir(dir)?,
        })
    }

    fn level_name(&self) -> &'static str {
        filter_name(self.filter)
    }

    /// Describes why `requested` cannot replace these settings, if it differs.
    fn conflict(&self, requested: &LogSettings) -> Option<String> {
        if self.dir != requested.dir {
            Some(format!(
                "logger already writes to `{}`; refusing to switch to `{}`",
                self.dir.display(),
                requested.dir.display()
            ))
        } else if self.filter != requested.filter {
            Some(format!(
                "logger already runs at `{}`; refusing to switch to `{}`",
                self.level_name(),
                requested.level_name()
            ))
        } else {
            None
        }
    }
}

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

/// Starts file logging at `level` under the absolute directory `log_dir`.
///
/// # Errors
/// - `level` is not one of `trace|debug|info|warn|error`.
/// - `log_dir` is empty, relative or cannot be created.
/// - Logging is already active with another level or directory.
/// - The logger backend fails to start.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let requested = LogSettings::parse(level, log_dir)?;
    // Losing a concurrent first call still leaves the winner's settings to compare against.
    let active = ACTIVE.get_or_try_init(|| ActiveLogger::start(requested.clone()))?;
    match active.settings.conflict(&requested) {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}

impl ActiveLogger {
    fn start(settings: LogSettings) -> Result<Self, String> {
        std::fs::create_dir_all(&settings.dir).map_err(|err| {
            format!("cannot create log directory `{}`: {err}", settings.dir.display())
        })?;

        let spec = LogSpecification::builder().default(settings.filter).build();
        let handle = Logger::with(spec)
            .log_to_file(
                FileSpec::default()
                    .directory(&settings.dir)
                    .basename(FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(ROTATE_AT_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(KEEP_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(write_line)
            .start()
            .map_err(|err| format!("logger backend did not start: {err}"))?;

        PANIC_HOOK.call_once(route_panics_to_log);

        info!(
            "event=logging_init module=logging status=ok level={} log_dir={} os={} profile={} version={}",
            settings.level_name(),
            settings.dir.display(),
            std::env::consts::OS,
            if cfg!(debug_assertions) { "debug" } else { "release" },
            env!("CARGO_PKG_VERSION")
        );

        Ok(Self {
            settings,
            _handle: handle,
        })
    }
}

fn write_line(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(
        w,
        "{} {:<5} [{}] {}",
        now.now().format(TIMESTAMP_FORMAT),
        record.level(),
        record.target(),
        record.args()
    )
}

/// `(level, log_dir)` of the active logger, `None` before initialisation.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE
        .get()
        .map(|active| (active.settings.level_name(), active.settings.dir.clone()))
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    filter_name(if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    })
}

/// Canonical lowercase name of a level spelling.
pub(crate) fn normalize_level(level: &str) -> Result<&'static str, String> {
    parse_filter(level).map(filter_name)
}

fn parse_filter(level: &str) -> Result<LevelFilter, String> {
    let wanted = level.trim();
    LEVELS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
        .map(|(_, filter)| *filter)
        .ok_or_else(|| format!("unknown log level `{wanted}` (use trace, debug, info, warn or error)"))
}

fn filter_name(filter: LevelFilter) -> &'static str {
    LEVELS
        .iter()
        .find(|(_, candidate)| *candidate == filter)
        .map_or("off", |(name, _)| *name)
}

fn absolute_dir(raw: &str) -> Result<PathBuf, String> {
    let path = Path::new(raw.trim());
    if path.as_os_str().is_empty() {
        Err("log directory is empty".to_string())
    } else if path.is_relative() {
        Err(format!("log directory `{}` is not absolute", path.display()))
    } else {
        Ok(path.to_path_buf())
    }
}

fn route_panics_to_log() {
    let chained = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = match info.location() {
            Some(loc) => format!("{}:{}", loc.file(), loc.line()),
            None => "unknown".to_string(),
        };
        error!(
            "event=panic_captured module=logging status=error location={location} payload={}",
            sanitize_message(&panic_message(info.payload()), MAX_PANIC_PAYLOAD_CHARS)
        );
        chained(info);
    }));
}

/// Text of a panic payload raised with a string message.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    match (payload.downcast_ref::<&str>(), payload.downcast_ref::<String>()) {
        (Some(text), _) => (*text).to_string(),
        (None, Some(text)) => text.clone(),
        (None, None) => "non-string panic payload".to_string(),
    }
}

/// Single-line copy of `value`, cut to `max_chars` characters plus `...`.
pub fn sanitize_message(value: &str, max_chars: usize) -> String {
    let mut chars = value
        .chars()
        .map(|c| if matches!(c, '\n' | '\r') { ' ' } else { c });
    let mut out: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir_string(dir: &tempfile::TempDir) -> String {
        dir.path()
            .to_str()
            .expect("temp dir should be valid UTF-8")
            .to_string()
    }

    #[test]
    fn level_spellings_map_to_canonical_names() {
        assert_eq!(normalize_level("INFO").expect("INFO is known"), "info");
        assert_eq!(normalize_level(" warning ").expect("warning is known"), "warn");
        assert_eq!(parse_filter("Trace").expect("Trace is known"), LevelFilter::Trace);
        assert!(normalize_level("verbose").is_err());
        assert!(normalize_level("off").is_err());
    }

    #[test]
    fn default_level_is_a_known_level() {
        assert!(normalize_level(default_log_level()).is_ok());
    }

    #[test]
    fn log_directory_must_be_absolute_and_non_empty() {
        let error = absolute_dir("logs/dev").expect_err("relative paths are rejected");
        assert!(error.contains("not absolute"));
        assert!(absolute_dir("  ").is_err());
    }

    #[test]
    fn conflict_reports_directory_before_level() {
        let base = LogSettings::parse("info", "/var/log/a").expect("settings parse");
        let moved = LogSettings::parse("debug", "/var/log/b").expect("settings parse");
        let relevelled = LogSettings::parse("debug", "/var/log/a").expect("settings parse");

        assert_eq!(base.conflict(&base.clone()), None);
        let dir_reason = base.conflict(&moved).expect("directory differs");
        assert!(dir_reason.contains("/var/log/b"));
        let level_reason = base.conflict(&relevelled).expect("level differs");
        assert!(level_reason.contains("`debug`"));
    }

    #[test]
    fn sanitize_flattens_lines_and_caps_length() {
        let sanitized = sanitize_message("line1\nline2\rline3", 8);
        assert_eq!(sanitized, "line1 li...");
        assert_eq!(sanitize_message("short", 8), "short");
    }

    #[test]
    fn panic_message_reads_string_payloads() {
        let borrowed: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(borrowed.as_ref()), "static text");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn second_start_must_match_the_first() {
        let first = tempfile::tempdir().expect("temp dir should be created");
        let second = tempfile::tempdir().expect("temp dir should be created");
        let first_dir = temp_dir_string(&first);

        init_logging("info", &first_dir).expect("first start succeeds");
        init_logging("INFO", &first_dir).expect("same settings are idempotent");

        let level_error = init_logging("debug", &first_dir).expect_err("level change fails");
        assert!(level_error.contains("refusing to switch"));
        let dir_error =
            init_logging("info", &temp_dir_string(&second)).expect_err("directory change fails");
        assert!(dir_error.contains("refusing to switch"));

        let (level, dir) = logging_status().expect("logging should be active");
        assert_eq!(level, "info");
        assert_eq!(dir, first.path());
    }
}
