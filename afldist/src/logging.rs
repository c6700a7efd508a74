//! Functions related to logging.

use byte_unit::n_mib_bytes;
use fern::colors::{Color, ColoredLevelConfig};
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use log::{self, LevelFilter};
use std::{panic, path::Path, process, str::FromStr};

use ansi_term::Colour::Red;
use anyhow::{Context, Result};

/// Map the number of `-v` flags to a level filter. Without any flag only
/// warnings and critical events are shown.
pub fn level_from_verbosity(occurrences: u64) -> LevelFilter {
    match occurrences {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

pub fn parse_level(log_level: &str) -> Result<LevelFilter> {
    LevelFilter::from_str(log_level).context(format!("'{}' is not a valid log level", log_level))
}

/// Setup the global logger and only log messages of level `level` or higher.
/// Records are always written to stdout and, if `log_path` is given, to a
/// rotating log file in addition.
pub fn setup_logger(log_path: Option<&Path>, level: LevelFilter) -> Result<()> {
    let level_colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::White);

    let mut dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} | {:<5} | {}[{}] | {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                level_colors.color(record.level()),
                record.target(),
                unsafe { libc::gettid() },
                message,
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(log_path) = log_path {
        let rotating_log_file = FileRotate::new(
            log_path,
            AppendCount::new(5),
            ContentLimit::BytesSurpassed(
                usize::try_from(n_mib_bytes!(256)).unwrap_or(usize::MAX),
            ),
            Compression::None,
            #[cfg(unix)]
            None,
        );
        dispatch = dispatch.chain(fern::Output::writer(Box::new(rotating_log_file), "\n"));
    }

    dispatch.apply().context("Failed to install the global logger")?;
    Ok(())
}

fn panic_hook(info: &panic::PanicInfo<'_>) {
    log::error!("{}", Red.paint(format!("\nPanic: {:#?}", info)));
    if let Some(location) = info.location() {
        let file = location.file();
        let line = location.line();
        log::error!("{}", Red.paint(format!("Panic location: {}:{}", file, line)));
    }
    process::abort();
}

pub fn setup_panic_logging() {
    log::info!("Panics are logged via log::error");
    panic::set_hook(Box::new(panic_hook));
}
