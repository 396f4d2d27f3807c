//! Structured logging with box-drawing output.
//!
//! Every line is routed through [`write_output`], which prints to stdout or,
//! while a [`LoggerGuard`] is alive, to a log file with ANSI colors stripped.
//! In simulation mode each line is prefixed with the simulated wall-clock
//! time in the orchestrator's timezone.
//!
//! ## Logging Conventions
//!
//! - **`log_block_start!`**: opens a new block for a significant event
//!   (playlist started, rule activated, configuration reloaded). Prints an
//!   empty `┃` for spacing, then `┣ message`.
//! - **`log_decorated!`**: a line within the current block, `┣ message`.
//! - **`log_indented!`**: nested detail under the previous line, `┃   message`.
//! - **`log_pipe!`**: a bare `┃` spacer, used before a leveled message that
//!   starts its own block. Not for use at the end of a block.
//! - **`log_version!`** / **`log_end!`**: startup header and final marker.
//! - **`log_info!`, `log_warning!`, `log_error!`, `log_critical!`, `log_debug!`**:
//!   leveled messages with a colored `[LEVEL]` tag. `log_debug!` is silent
//!   unless debug output was enabled with [`Log::set_debug`].

use std::io::Write;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(true);
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

// Orchestrator timezone used for simulation timestamps
static TIMEZONE: OnceLock<chrono_tz::Tz> = OnceLock::new();

// Set while --log routes output to a file
static LOG_CHANNEL: OnceLock<Sender<LogMessage>> = OnceLock::new();

enum LogMessage {
    Formatted(String),
    Shutdown,
}

/// Severity tag for leveled messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
    Critical,
    Debug,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "\x1b[32mINFO\x1b[0m",
            Level::Warning => "\x1b[33mWARNING\x1b[0m",
            Level::Error => "\x1b[31mERROR\x1b[0m",
            Level::Critical => "\x1b[31mCRITICAL\x1b[0m",
            Level::Debug => "\x1b[36mDEBUG\x1b[0m",
        }
    }
}

/// Shape of one emitted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Block,
    Decorated,
    Indented,
    Pipe,
    Version,
    End,
    Leveled(Level),
    /// Leveled message outside the pipe structure.
    Standalone(Level),
    /// Error that terminates the flow with `┗`.
    Exit,
}

pub struct Log;

impl Log {
    /// Enable or disable all output, e.g. for quiet CLI queries or tests.
    pub fn set_enabled(enabled: bool) {
        LOGGING_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled() -> bool {
        LOGGING_ENABLED.load(Ordering::SeqCst)
    }

    pub fn set_debug(enabled: bool) {
        DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn is_debug_enabled() -> bool {
        DEBUG_ENABLED.load(Ordering::SeqCst)
    }

    /// Set the timezone used for simulation timestamps. Only the first call takes effect.
    pub fn set_timezone(tz: chrono_tz::Tz) {
        let _ = TIMEZONE.set(tz);
    }

    /// Route all further output to `file_path` until the guard is dropped.
    pub fn start_file_logging(file_path: String) -> anyhow::Result<LoggerGuard> {
        let (tx, rx) = channel();
        LOG_CHANNEL
            .set(tx.clone())
            .map_err(|_| anyhow::anyhow!("Logger channel already initialized"))?;

        let handle = std::thread::spawn(move || {
            let mut file = std::fs::File::create(&file_path)?;
            while let Ok(LogMessage::Formatted(text)) = rx.recv() {
                file.write_all(text.as_bytes())?;
            }
            file.flush()?;
            Ok::<(), anyhow::Error>(())
        });

        Ok(LoggerGuard {
            tx,
            handle: Some(handle),
        })
    }

    /// `[HH:MM:SS] ` in simulation mode, empty otherwise.
    pub fn timestamp_prefix() -> String {
        if !(crate::time_source::is_initialized() && crate::time_source::is_simulated()) {
            return String::new();
        }
        let now = crate::time_source::now();
        match TIMEZONE.get() {
            Some(tz) => format!("[{}] ", now.with_timezone(tz).format("%H:%M:%S")),
            None => format!("[{}] ", now.format("%H:%M:%SZ")),
        }
    }
}

/// Flushes and closes the log file on drop.
pub struct LoggerGuard {
    tx: Sender<LogMessage>,
    handle: Option<std::thread::JoinHandle<anyhow::Result<()>>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(LogMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            for skipped in chars.by_ref() {
                if skipped == 'm' {
                    break;
                }
            }
        } else {
            result.push(ch);
        }
    }
    result
}

/// Render a line without writing it.
pub fn format_line(line: Line, prefix: &str, message: &str) -> String {
    match line {
        Line::Block => format!("{prefix}┃\n{prefix}┣ {message}\n"),
        Line::Decorated => format!("{prefix}┣ {message}\n"),
        Line::Indented => format!("{prefix}┃   {message}\n"),
        Line::Pipe => format!("{prefix}┃\n"),
        Line::Version => format!("{prefix}┏ lightkeeper v{} ━━╸\n", env!("CARGO_PKG_VERSION")),
        Line::End => format!("{prefix}╹\n"),
        Line::Leveled(level) => format!("{prefix}┣[{}] {message}\n", level.tag()),
        Line::Standalone(level) => format!("{prefix}[{}] {message}\n", level.tag()),
        Line::Exit => format!("{prefix}┃\n{prefix}┗[{}] {message}\n", Level::Error.tag()),
    }
}

/// Format and write one line if logging is on. Used by the macros.
pub fn emit(line: Line, message: &str) {
    if !Log::is_enabled() {
        return;
    }
    if matches!(line, Line::Leveled(Level::Debug)) && !Log::is_debug_enabled() {
        return;
    }
    write_output(&format_line(line, &Log::timestamp_prefix(), message));
}

/// Write already formatted text to the active sink.
pub fn write_output(text: &str) {
    if let Some(tx) = LOG_CHANNEL.get() {
        let _ = tx.send(LogMessage::Formatted(strip_ansi_codes(text)));
    } else {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_line {
    ($line:expr, $fmt:literal $($arg:tt)*) => {
        if $crate::logger::Log::is_enabled() {
            $crate::logger::emit($line, &format!($fmt $($arg)*));
        }
    };
    ($line:expr, $expr:expr) => {
        if $crate::logger::Log::is_enabled() {
            $crate::logger::emit($line, &$expr.to_string());
        }
    };
}

/// Start a new block of related output.
#[macro_export]
macro_rules! log_block_start {
    ($($arg:tt)+) => { $crate::__log_line!($crate::logger::Line::Block, $($arg)+) };
}

/// A line within the current block.
#[macro_export]
macro_rules! log_decorated {
    ($($arg:tt)+) => { $crate::__log_line!($crate::logger::Line::Decorated, $($arg)+) };
}

/// Nested detail under the previous line.
#[macro_export]
macro_rules! log_indented {
    ($($arg:tt)+) => { $crate::__log_line!($crate::logger::Line::Indented, $($arg)+) };
}

#[macro_export]
macro_rules! log_pipe {
    () => { $crate::logger::emit($crate::logger::Line::Pipe, "") };
}

#[macro_export]
macro_rules! log_version {
    () => { $crate::logger::emit($crate::logger::Line::Version, "") };
}

#[macro_export]
macro_rules! log_end {
    () => { $crate::logger::emit($crate::logger::Line::End, "") };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => {
        $crate::__log_line!($crate::logger::Line::Leveled($crate::logger::Level::Info), $($arg)+)
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)+) => {
        $crate::__log_line!($crate::logger::Line::Leveled($crate::logger::Level::Warning), $($arg)+)
    };
}

/// Warning printed outside the pipe structure, e.g. before `log_version!`.
#[macro_export]
macro_rules! log_warning_standalone {
    ($($arg:tt)+) => {
        $crate::__log_line!($crate::logger::Line::Standalone($crate::logger::Level::Warning), $($arg)+)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => {
        $crate::__log_line!($crate::logger::Line::Leveled($crate::logger::Level::Error), $($arg)+)
    };
}

#[macro_export]
macro_rules! log_error_standalone {
    ($($arg:tt)+) => {
        $crate::__log_line!($crate::logger::Line::Standalone($crate::logger::Level::Error), $($arg)+)
    };
}

/// Error that ends the current flow, drawn with a terminal corner.
#[macro_export]
macro_rules! log_error_exit {
    ($($arg:tt)+) => { $crate::__log_line!($crate::logger::Line::Exit, $($arg)+) };
}

#[macro_export]
macro_rules! log_critical {
    ($($arg:tt)+) => {
        $crate::__log_line!($crate::logger::Line::Leveled($crate::logger::Level::Critical), $($arg)+)
    };
}

/// Operational detail, printed only with `--debug`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => {
        $crate::__log_line!($crate::logger::Line::Leveled($crate::logger::Level::Debug), $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_shapes() {
        assert_eq!(format_line(Line::Decorated, "", "hello"), "┣ hello\n");
        assert_eq!(format_line(Line::Indented, "", "x"), "┃   x\n");
        assert_eq!(format_line(Line::Block, "[12:00:00] ", "go"), "[12:00:00] ┃\n[12:00:00] ┣ go\n");
        assert!(format_line(Line::Version, "", "").contains("lightkeeper v"));
    }

    #[test]
    fn test_strip_ansi_codes() {
        let line = format_line(Line::Leveled(Level::Warning), "", "careful");
        assert_eq!(strip_ansi_codes(&line), "┣[WARNING] careful\n");
    }
}
