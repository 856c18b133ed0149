mod layer;
mod registry;
mod sink;

use std::sync::Arc;

pub use layer::SinkLayer;
pub use registry::{clear_log_sink, dispatch, log_enabled, set_log_level, set_log_sink};
pub use sink::*;

/// Shared handle to a log sink.
pub type LogSinkHandle = Arc<dyn LogSink>;

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serial_test::serial;
    use tracing_subscriber::prelude::*;

    use super::*;

    fn record(level: LogLevel, message: &str) -> LogRecord {
        LogRecord::new(level, "test", message)
    }

    #[test]
    fn test_level_ordering_and_conversion() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert_eq!(LogLevel::from(&tracing::Level::TRACE), LogLevel::Debug);
        assert_eq!(LogLevel::from(&tracing::Level::WARN), LogLevel::Warning);
        assert_eq!(LogLevel::Warning.to_string(), "warning");
    }

    #[test]
    fn test_channel_sink() {
        let (sink, rx) = ChannelSink::new();
        sink.emit(&record(LogLevel::Info, "one"));
        sink.emit(&record(LogLevel::Error, "two"));

        let records: Vec<_> = rx.try_iter().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].message, "two");
    }

    #[test]
    fn test_channel_sink_receiver_dropped() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(&record(LogLevel::Info, "orphaned"));
    }

    #[test]
    fn test_callback_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let sink = CallbackSink::new(move |level, message| {
            seen_cb.lock().unwrap().push((level, message.to_string()));
        });

        sink.emit(&record(LogLevel::Warning, "careful"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(LogLevel::Warning, "careful".to_string())]
        );
    }

    #[test]
    fn test_sinks_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NullSink>();
        assert_send_sync::<ChannelSink>();
        assert_send_sync::<CollectorSink>();
        assert_send_sync::<CallbackSink>();
    }

    #[test]
    #[serial]
    fn test_dispatch_respects_threshold() {
        let collector = Arc::new(CollectorSink::default());
        set_log_sink(collector.clone(), LogLevel::Warning);

        dispatch(&record(LogLevel::Debug, "hidden"));
        dispatch(&record(LogLevel::Info, "hidden"));
        dispatch(&record(LogLevel::Warning, "shown"));
        dispatch(&record(LogLevel::Error, "shown"));
        assert_eq!(collector.len(), 2);

        set_log_level(LogLevel::Debug);
        dispatch(&record(LogLevel::Debug, "now shown"));
        assert_eq!(collector.len(), 3);

        clear_log_sink();
        dispatch(&record(LogLevel::Error, "nobody listening"));
        assert_eq!(collector.len(), 3);
    }

    #[test]
    #[serial]
    fn test_last_registration_wins() {
        let first = Arc::new(CollectorSink::default());
        let second = Arc::new(CollectorSink::default());

        set_log_sink(first.clone(), LogLevel::Debug);
        set_log_sink(second.clone(), LogLevel::Debug);
        dispatch(&record(LogLevel::Info, "hello"));

        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
        clear_log_sink();
    }

    #[test]
    #[serial]
    fn test_sink_layer_forwards_tracing_events() {
        let collector = Arc::new(CollectorSink::default());
        set_log_sink(collector.clone(), LogLevel::Info);

        let subscriber = tracing_subscriber::registry().with(SinkLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("below threshold");
            tracing::info!(path = "/tmp/a", "extracted");
            tracing::warn!(count = 3, "skipped entries");
        });
        clear_log_sink();

        let records = collector.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, LogLevel::Info);
        assert_eq!(records[0].message, "extracted path=/tmp/a");
        assert_eq!(records[1].message, "skipped entries count=3");
    }
}
