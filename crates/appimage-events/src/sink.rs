use std::{
    fmt,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex, PoisonError,
    },
};

/// Severity of a log record, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// A single log message delivered to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub target: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            target: target.into(),
            message: message.into(),
        }
    }
}

/// Trait for consuming log records.
///
/// Each embedder provides its own implementation.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Channel-based sink.
///
/// The receiver end can be polled by any consumer (GUI, test harness, etc.).
pub struct ChannelSink {
    sender: Mutex<Sender<LogRecord>>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<LogRecord>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, record: &LogRecord) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = sender.send(record.clone());
    }
}

/// Discards everything.
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _record: &LogRecord) {}
}

/// Stores every record for later inspection.
#[derive(Default)]
pub struct CollectorSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CollectorSink {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for CollectorSink {
    fn emit(&self, record: &LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

/// Forwards records to a closure, mirroring a C-style `(level, message)` callback.
pub struct CallbackSink {
    callback: Box<dyn Fn(LogLevel, &str) + Send + Sync>,
}

impl CallbackSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl LogSink for CallbackSink {
    fn emit(&self, record: &LogRecord) {
        (self.callback)(record.level, &record.message);
    }
}
