//! Integration tests for the global logging setup
//!
//! A global subscriber can only be installed once per process, so everything
//! that depends on it lives in a single test.

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, redact_headers, LogFormat, LoggingConfig};
use core_runtime::Error;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CollectingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CollectingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Warn
    }
}

#[test]
fn test_global_logging_lifecycle() {
    let sink = Arc::new(CollectingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_pii_redaction(false)
        .with_logger_sink(sink.clone());

    init_logging(config.clone()).unwrap();

    // Outside a runtime the sink is called inline.
    tracing::warn!(target: "core_offline", asset_id = "episode-9", "cancellation not acknowledged");
    tracing::info!(target: "core_offline", "below sink level");

    {
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert_eq!(entries[0].fields.get("asset_id"), Some(&"episode-9".to_string()));
    }

    // Redaction disabled: only credential-looking headers are masked.
    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), "Bearer abc".to_string());
    headers.insert("X-Client".to_string(), "tv".to_string());
    let rendered = redact_headers(&headers);
    assert!(rendered.contains("Authorization=[REDACTED]"));
    assert!(rendered.contains("X-Client=tv"));

    // Second installation is rejected.
    assert!(matches!(init_logging(config), Err(Error::Config(_))));
}
