//! Run log for PaintLayers.
//!
//! One file per run, truncated on [`init`]. By default it lives in the OS data
//! directory (`PaintLayers/paintlayers.log`); the `PAINTLAYERS_LOG` environment
//! variable points it somewhere else.
//!
//! Lines written while a [`JobScope`] is alive on the current thread carry
//! that job's tag, so the optimizer and cache messages of a batch run can be
//! told apart. Before [`init`] every macro is a no-op.

use std::cell::RefCell;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static SINK: OnceLock<Mutex<File>> = OnceLock::new();

thread_local! {
    static JOB_TAG: RefCell<Option<String>> = const { RefCell::new(None) };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Panic,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO ",
            Level::Warn => "WARN ",
            Level::Error => "ERROR",
            Level::Panic => "PANIC",
        }
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Error, format_args!($($arg)*))
    };
}

/// Open (truncating) the run log and hook panics into it.
/// Returns the log path, or `None` when the file could not be opened.
pub fn init() -> Option<PathBuf> {
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("warning: no run log ({}: {})", path.display(), e);
            return None;
        }
    };
    if SINK.set(Mutex::new(file)).is_err() {
        // Already initialised by an earlier call
        return Some(path);
    }

    append(&format!(
        "PaintLayers {} (pid {}) log started at unix {}",
        env!("CARGO_PKG_VERSION"),
        std::process::id(),
        unix_millis() / 1000
    ));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write(Level::Panic, format_args!("{}", info));
        prev(info);
    }));
    Some(path)
}

/// Write one line at `level`. Called through the `log_*!` macros.
pub fn write(level: Level, args: fmt::Arguments<'_>) {
    if SINK.get().is_none() {
        return;
    }
    let line = JOB_TAG.with(|tag| format_line(unix_millis(), level, tag.borrow().as_deref(), args));
    append(&line);
}

fn append(line: &str) {
    if let Some(sink) = SINK.get()
        && let Ok(mut file) = sink.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Tags this thread's log lines with a job until dropped.
/// Scopes nest; dropping restores the outer tag.
#[must_use = "the tag is removed when the scope is dropped"]
pub struct JobScope {
    outer: Option<String>,
}

impl JobScope {
    pub fn enter(tag: impl Into<String>) -> Self {
        let outer = JOB_TAG.with(|t| t.borrow_mut().replace(tag.into()));
        Self { outer }
    }
}

impl Drop for JobScope {
    fn drop(&mut self) {
        let outer = self.outer.take();
        JOB_TAG.with(|t| *t.borrow_mut() = outer);
    }
}

/// `HH:MM:SS.mmm LEVEL [job] message`, time in UTC.
fn format_line(millis: u128, level: Level, job: Option<&str>, args: fmt::Arguments<'_>) -> String {
    let secs = (millis / 1000) as u64;
    let clock = format!(
        "{:02}:{:02}:{:02}.{:03}",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        millis % 1000
    );
    match job {
        Some(job) => format!("{} {} [{}] {}", clock, level.tag(), job, args),
        None => format!("{} {} {}", clock, level.tag(), args),
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn log_file_path() -> PathBuf {
    if let Some(custom) = std::env::var_os("PAINTLAYERS_LOG") {
        return PathBuf::from(custom);
    }
    data_dir().join("PaintLayers").join("paintlayers.log")
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support");
        }
    }
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
}
