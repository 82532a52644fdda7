//! Session logger: the `log` backend for the whole crate.
//!
//! Records go to a single file in the OS data directory. The file is
//! truncated at each launch, so it only holds the most recent session.
//!
//! Log location:
//!   Linux:    `~/.local/share/maskforge/maskforge.log`
//!   Windows:  `%APPDATA%\maskforge\maskforge.log`
//!   macOS:    `~/Library/Application Support/maskforge/maskforge.log`
//!
//! The level comes from `MASKFORGE_LOG` (`error`..`trace`, default `info`).
//! Warnings and errors are mirrored to stderr.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

pub const LEVEL_ENV: &str = "MASKFORGE_LOG";

static LOGGER: SessionLogger = SessionLogger {
    file: OnceLock::new(),
};
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

struct SessionLogger {
    file: OnceLock<Mutex<File>>,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), record.target(), &record.args().to_string());
        if record.level() <= Level::Warn {
            eprintln!("{}", line);
        }
        write_line(&line);
    }

    fn flush(&self) {
        if let Some(mutex) = self.file.get()
            && let Ok(mut file) = mutex.lock()
        {
            let _ = file.flush();
        }
    }
}

/// Path of the current session log, once [`init`] succeeded in opening it.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Write a raw line to the session log. I/O errors are ignored.
fn write_line(line: &str) {
    if let Some(mutex) = LOGGER.file.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

fn format_line(level: Level, target: &str, msg: &str) -> String {
    format!("[{}] [{}] [{}] {}", timestamp(), level, target, msg)
}

/// Parse a level name as accepted in `MASKFORGE_LOG`.
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    value.trim().parse::<LevelFilter>().ok()
}

/// Install the session logger. Call once, early in `main`.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that mirrors the panic message into the log.
///
/// Failing to open the file is not fatal: records then only reach stderr
/// (warnings and above).
pub fn init() {
    let level = std::env::var(LEVEL_ENV)
        .ok()
        .and_then(|v| parse_level(&v))
        .unwrap_or(LevelFilter::Info);

    if let Some(path) = log_file_path() {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
        {
            Ok(f) => {
                let _ = LOG_PATH.set(path.clone());
                let _ = LOGGER.file.set(Mutex::new(f));
            }
            Err(e) => eprintln!("[logger] failed to open log file {:?}: {}", path, e),
        }
    }

    if log::set_logger(&LOGGER).is_err() {
        // Another logger won; keep it.
        return;
    }
    log::set_max_level(level);

    write_line(&format!(
        "=== {} {} session started (unix {}) ===",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        unix_seconds().unwrap_or_default()
    ));
    if let Some(path) = log_path() {
        write_line(&format!("Log file: {}", path.display()));
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
        LOGGER.flush();
        prev(info);
    }));
}

fn log_file_path() -> Option<PathBuf> {
    let name = env!("CARGO_PKG_NAME");
    dirs::data_dir().map(|base| base.join(name).join(format!("{}.log", name)))
}

fn unix_seconds() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

/// `HH:MM:SS` within the current UTC day.
fn timestamp() -> String {
    match unix_seconds() {
        Some(secs) => {
            let h = (secs % 86400) / 3600;
            let m = (secs % 3600) / 60;
            let s = secs % 60;
            format!("{:02}:{:02}:{:02}", h, m, s)
        }
        None => "??:??:??".to_string(),
    }
}
