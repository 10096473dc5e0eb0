use std::any::Any;
use std::path::Path;

use log::LevelFilter;

pub const LOG_FILE_BASENAME: &str = "taskflow";
pub const LOG_FILE_SUFFIX: &str = "log";
pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const LOG_ROTATE_KEEP_FILES: usize = 10;
pub const ENV_LOG: &str = "TASKFLOW_LOG";
pub const ENV_LOG_STDERR: &str = "TASKFLOW_LOG_STDERR";

/// Log files live next to the config file in the data directory.
pub fn log_directory(data_dir: &Path) -> &Path {
    data_dir
}

/// Log spec: `TASKFLOW_LOG`, then `RUST_LOG`, then a build-dependent default that
/// keeps dependencies at WARN.
pub fn log_spec<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let default_spec = if cfg!(debug_assertions) {
        "warn,taskflow_lib=debug,taskflow=debug"
    } else {
        "warn,taskflow_lib=info,taskflow=info"
    };
    lookup(ENV_LOG)
        .filter(|value| !value.trim().is_empty())
        .or_else(|| lookup("RUST_LOG").filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| default_spec.to_string())
}

/// Level mirrored to stderr. Stdout carries command output, so the console copy
/// never goes there. `TASKFLOW_LOG_STDERR` accepts a level name or `off`.
pub fn stderr_level<F>(lookup: F) -> LevelFilter
where
    F: Fn(&str) -> Option<String>,
{
    let fallback = if cfg!(debug_assertions) {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    match lookup(ENV_LOG_STDERR) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().unwrap_or_else(|_| {
            eprintln!("taskflow: ignoring {ENV_LOG_STDERR}={raw:?}");
            fallback
        }),
        _ => fallback,
    }
}

/// Message carried by a panic, for the two payload types `panic!` produces.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Starts file logging in `data_dir`. The returned handle owns the writer:
/// keep it alive, and flush it before the process exits.
#[cfg(all(feature = "app", not(test)))]
pub fn init_logging(data_dir: &Path) -> Result<flexi_logger::LoggerHandle, flexi_logger::FlexiLoggerError> {
    use flexi_logger::{
        detailed_format, Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming, WriteMode,
    };

    std::fs::create_dir_all(data_dir)?;

    let env = |key: &str| std::env::var(key).ok();
    let duplicate = match stderr_level(env) {
        LevelFilter::Off => Duplicate::None,
        LevelFilter::Error => Duplicate::Error,
        LevelFilter::Warn => Duplicate::Warn,
        LevelFilter::Info => Duplicate::Info,
        LevelFilter::Debug => Duplicate::Debug,
        LevelFilter::Trace => Duplicate::Trace,
    };
    let handle = Logger::try_with_str(log_spec(env))?
        .log_to_file(
            FileSpec::default()
                .directory(log_directory(data_dir))
                .basename(LOG_FILE_BASENAME)
                .suffix(LOG_FILE_SUFFIX),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .format_for_files(detailed_format)
        .rotate(
            Criterion::Size(LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(duplicate)
        .start()?;

    std::panic::set_hook(Box::new(|info: &std::panic::PanicHookInfo<'_>| {
        let location = info
            .location()
            .map(|loc| loc.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        log::error!(
            "panic: message={} location={location}\nbacktrace:\n{}",
            panic_message(info.payload()),
            std::backtrace::Backtrace::force_capture()
        );
        eprintln!("taskflow: internal error at {location}, see {LOG_FILE_BASENAME}.{LOG_FILE_SUFFIX}");
    }));

    log::debug!(
        "logger initialized dir={} version={}",
        log_directory(data_dir).display(),
        env!("CARGO_PKG_VERSION")
    );
    Ok(handle)
}
