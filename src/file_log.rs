//! The append-only JSON lines sink.

use crate::{MemorySample, SinkError, TickSink};
use serde::{Deserialize, Serialize};
use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

/// One line of the log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: String,
    pub collector_timestamp: String,
}

/// Appends one [`LogRecord`] per tick to a local file.
///
/// The file is opened for every record and closed again before
/// [`FileLogger::append`] returns, whether or not the write succeeded. Nothing
/// is held open between ticks, so the file can be moved or deleted while the
/// process runs and the next tick simply recreates it. There is no locking:
/// a single writer per path is assumed.
#[derive(Debug, Clone)]
pub struct FileLogger {
    path: PathBuf,
    message: String,
}

impl FileLogger {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the record this logger writes for `sample`.
    pub fn record_for(&self, sample: &MemorySample) -> LogRecord {
        LogRecord {
            message: self.message.clone(),
            collector_timestamp: sample.timestamp(),
        }
    }

    /// Append `record` as a single JSON line.
    pub fn append(&self, record: &LogRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(SinkError::Open)?;

        file.write_all(&line).map_err(SinkError::Write)
    }
}

impl TickSink for FileLogger {
    fn name(&self) -> &'static str {
        "file_log"
    }

    fn accept(&mut self, sample: &MemorySample) -> Result<(), SinkError> {
        self.append(&self.record_for(sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::fs;

    #[test]
    fn appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = FileLogger::new(dir.path().join("out.json"), "otel-sla-logs");

        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        logger.accept(&MemorySample::at(1, at)).unwrap();
        logger.accept(&MemorySample::now(2)).unwrap();

        let contents = fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"message":"otel-sla-logs","collector_timestamp":"2025-01-02T03:04:05Z"}"#
        );
        for line in lines {
            let record: LogRecord = serde_json::from_str(line).unwrap();
            assert_eq!(record.message, "otel-sla-logs");
            assert!(chrono::DateTime::parse_from_rfc3339(&record.collector_timestamp).is_ok());
        }
    }

    #[test]
    fn existing_content_is_preserved() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "{\"message\":\"old\",\"collector_timestamp\":\"x\"}\n").unwrap();

        let logger = FileLogger::new(file.path(), "new");
        logger
            .append(&LogRecord {
                message: "new".into(),
                collector_timestamp: "y".into(),
            })
            .unwrap();

        let contents = fs::read_to_string(file.path()).unwrap();
        assert!(contents.starts_with("{\"message\":\"old\""));
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn unopenable_path_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = FileLogger::new(dir.path().join("missing").join("out.json"), "m");
        let err = logger.accept(&MemorySample::now(0)).unwrap_err();
        assert!(matches!(err, SinkError::Open(_)));
    }
}
