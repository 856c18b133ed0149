use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::{LogLevel, LogRecord, LogSink};

struct ActiveSink {
    sink: Arc<dyn LogSink>,
    min_level: LogLevel,
}

static ACTIVE: LazyLock<RwLock<Option<ActiveSink>>> = LazyLock::new(|| RwLock::new(None));

/// Installs `sink` as the process-wide log sink. The previous sink, if any, is replaced.
pub fn set_log_sink(sink: Arc<dyn LogSink>, min_level: LogLevel) {
    *ACTIVE.write().unwrap_or_else(PoisonError::into_inner) = Some(ActiveSink {
        sink,
        min_level,
    });
}

/// Changes the threshold of the active sink. No-op without one.
pub fn set_log_level(min_level: LogLevel) {
    if let Some(active) = ACTIVE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .as_mut()
    {
        active.min_level = min_level;
    }
}

pub fn clear_log_sink() {
    *ACTIVE.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Whether a record at `level` would currently reach a sink.
pub fn log_enabled(level: LogLevel) -> bool {
    ACTIVE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .is_some_and(|active| level >= active.min_level)
}

/// Delivers `record` to the active sink if it meets the threshold.
pub fn dispatch(record: &LogRecord) {
    let sink = {
        let guard = ACTIVE.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(active) if record.level >= active.min_level => active.sink.clone(),
            _ => return,
        }
    };
    // lock released so the sink may re-register
    sink.emit(record);
}
