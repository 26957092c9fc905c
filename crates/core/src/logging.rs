//! Centralized logging configuration for the decoder and emulator.
//!
//! - **LogConfig**: process-global configuration using atomic levels
//! - **LogLevel**: hierarchical log levels (Off < Error < Warn < Info < Debug < Trace)
//! - **LogCategory**: Decoder, Emulator and Stubs (skipped/unsupported work)
//! - **log()**: lazy logging entry point; the message closure only runs when
//!   the category/level combination is enabled
//!
//! Output goes to stderr, or to a log file once [`LogConfig::set_log_file`]
//! has been called. Everything runs on the caller's thread.
//!
//! # Usage
//!
//! ```rust
//! use emu86_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Decoder, LogLevel::Debug, || {
//!     format!("label0 -> instruction {}", 12)
//! });
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive, names or 0-5)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Log category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Byte stream scanning, label discovery
    Decoder,
    /// Instruction execution
    Emulator,
    /// Instructions the emulator skips
    Stubs,
}

impl LogCategory {
    fn index(self) -> usize {
        match self {
            LogCategory::Decoder => 0,
            LogCategory::Emulator => 1,
            LogCategory::Stubs => 2,
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    /// Applies to every category without its own level
    global_level: AtomicU8,
    /// Per-category overrides, indexed by `LogCategory::index`
    category_levels: [AtomicU8; 3],
    /// Optional file sink; stderr when empty
    sink: Mutex<Option<File>>,
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: [
                AtomicU8::new(LogLevel::Off as u8),
                AtomicU8::new(LogLevel::Off as u8),
                AtomicU8::new(LogLevel::Off as u8),
            ],
            sink: Mutex::new(None),
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category with its own level uses it; otherwise the global level applies.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Reset all logging to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in [LogCategory::Decoder, LogCategory::Emulator, LogCategory::Stubs] {
            self.set_level(category, LogLevel::Off);
        }
    }

    /// Append log output to `path` instead of stderr.
    pub fn set_log_file(&self, path: &Path) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if let Ok(mut sink) = self.sink.lock() {
            *sink = Some(file);
        }
        Ok(())
    }

    /// Go back to logging on stderr
    pub fn clear_log_file(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            *sink = None;
        }
    }

    fn write_message(&self, category: LogCategory, message: &str) {
        if let Ok(mut sink) = self.sink.lock() {
            if let Some(file) = sink.as_mut() {
                // A failed log write falls back to stderr rather than aborting
                if writeln!(file, "[{:?}] {}", category, message).is_ok() {
                    return;
                }
            }
        }
        eprintln!("[{:?}] {}", category, message);
    }
}

/// Log a message with the specified category and level.
///
/// The closure is only evaluated when logging is enabled for the pair.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if config.should_log(category, level) {
        config.write_message(category, &message_fn());
    }
}
