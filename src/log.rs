//! Run log for weave.
//!
//! Everything goes to `~/.weave/weave.log` (or the file given to [`init_at`]);
//! stdout belongs to plans and reports. Lines look like
//!
//! ```text
//! 14:02:11.538 WARN  [run 3f2a9c1e] Task T3 failed: disk full
//! ```
//!
//! The run tag is present while a coordinator run is in progress, so the
//! interleaved output of a run and its validation suite can be told apart.
//!
//! The threshold is `info` unless `--debug` / `WEAVE_DEBUG=1` lowers it to
//! `debug`, or `WEAVE_LOG=<level>` names one explicitly.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{OnceLock, RwLock};

use uuid::Uuid;

static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();
static DEBUG: AtomicBool = AtomicBool::new(false);
static THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static RUN_TAG: RwLock<Option<String>> = RwLock::new(None);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

/// Set up the log file under `~/.weave/` and pick the threshold.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("WEAVE_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    DEBUG.store(debug || env_debug, Ordering::SeqCst);

    let explicit = std::env::var("WEAVE_LOG")
        .ok()
        .and_then(|v| v.parse::<LogLevel>().ok());
    set_level(explicit.unwrap_or(if is_debug() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }));

    if let Some(home) = dirs::home_dir() {
        init_at(home.join(".weave").join("weave.log"));
    }
}

/// Use `path` as the log file, truncating it. Only the first call in a
/// process takes effect.
pub fn init_at(path: PathBuf) {
    if LOG_FILE.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&path, "");
    let _ = LOG_FILE.set(path);
}

pub fn is_debug() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

pub fn set_level(level: LogLevel) {
    THRESHOLD.store(level as u8, Ordering::SeqCst);
}

pub fn level() -> LogLevel {
    let raw = THRESHOLD.load(Ordering::Relaxed) as usize;
    LogLevel::ALL[raw.min(LogLevel::ALL.len() - 1)]
}

/// Tags log lines with a run id until dropped. A guard only clears the tag
/// it set, so a newer run's tag survives an older guard.
#[must_use = "the run tag is cleared when the guard is dropped"]
pub struct RunTag {
    tag: String,
}

impl Drop for RunTag {
    fn drop(&mut self) {
        if let Ok(mut current) = RUN_TAG.write() {
            if current.as_deref() == Some(self.tag.as_str()) {
                *current = None;
            }
        }
    }
}

fn short_id(run_id: Uuid) -> String {
    run_id.simple().to_string().chars().take(8).collect()
}

/// Start tagging lines with the first eight hex digits of `run_id`.
pub fn enter_run(run_id: Uuid) -> RunTag {
    let tag = short_id(run_id);
    if let Ok(mut current) = RUN_TAG.write() {
        *current = Some(tag.clone());
    }
    RunTag { tag }
}

fn current_run() -> Option<String> {
    RUN_TAG.read().ok().and_then(|tag| tag.clone())
}

fn format_line(timestamp: &str, level: LogLevel, run: Option<&str>, msg: &str) -> String {
    match run {
        Some(run) => format!("{} {:<5} [run {}] {}", timestamp, level, run, msg),
        None => format!("{} {:<5} {}", timestamp, level, msg),
    }
}

/// Append one line if `level` passes the threshold and a file is set.
pub fn write(level: LogLevel, msg: &str) {
    if level > self::level() {
        return;
    }
    let Some(path) = LOG_FILE.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
        let line = format_line(&timestamp, level, current_run().as_deref(), msg);
        let _ = writeln!(file, "{}", line);
    }
}

#[macro_export]
macro_rules! wlog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Per-task and per-attempt detail; off unless debugging.
#[macro_export]
macro_rules! wlog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Debug, &format!($($arg)*))
    };
}

/// Command output excerpts and status board writes.
#[macro_export]
macro_rules! wlog_trace {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Trace, &format!($($arg)*))
    };
}
