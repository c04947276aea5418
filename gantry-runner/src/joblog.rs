//! Per-pipeline log multiplexer
//!
//! Step output arrives as arbitrary byte writes (container logs, clone
//! progress) that may split mid-line; [`LineAssembler`] reconstructs
//! logical lines and [`JobLogger`] fans each completed line out to every
//! sink. The persisted `data/job.log` file and the live console are
//! always written together.

use chrono::SecondsFormat;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use gantry_core::domain::log::{LogEntry, LogLevel};

/// Reconstructs logical lines from a stream of byte chunks
///
/// Splitting prefers `\n`; when the buffered data holds no `\n` at all it
/// falls back to `\r`, so carriage-return progress output still becomes
/// lines. A trailing `\r` before the terminator is trimmed. An incomplete
/// trailing fragment is buffered and prepended to the next chunk.
#[derive(Debug, Default)]
pub struct LineAssembler {
    remainder: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk, returning every line it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }

        let mut data = std::mem::take(&mut self.remainder);
        data.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        let mut rest = data.as_str();

        loop {
            let split_at = match rest.find('\n') {
                Some(i) => i,
                None => match rest.find('\r') {
                    Some(i) => i,
                    None => break,
                },
            };

            let line = rest[..split_at].strip_suffix('\r').unwrap_or(&rest[..split_at]);
            lines.push(line.to_string());
            rest = &rest[split_at + 1..];
        }

        self.remainder = rest.to_string();
        lines
    }

    /// Takes the buffered fragment, if any
    pub fn flush(&mut self) -> Option<String> {
        if self.remainder.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.remainder))
        }
    }
}

/// One destination for completed log records
pub trait RecordSink: Send + Sync {
    fn emit(&self, entry: &LogEntry);
}

/// Appends tab-separated `timestamp level message` lines to the job log file
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            file: Mutex::new(File::create(path)?),
        })
    }
}

impl RecordSink for FileSink {
    fn emit(&self, entry: &LogEntry) {
        let line = format!(
            "{}\t{}\t{}\n",
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            entry.level,
            entry.message
        );
        if let Err(e) = self.file.lock().expect("log file lock").write_all(line.as_bytes()) {
            warn!(error = %e, "failed to append to job log file");
        }
    }
}

/// Mirrors records onto the process log, tagged with the pipeline uid
pub struct ConsoleSink {
    pipeline_uid: String,
}

impl ConsoleSink {
    pub fn new(pipeline_uid: impl Into<String>) -> Self {
        Self {
            pipeline_uid: pipeline_uid.into(),
        }
    }
}

impl RecordSink for ConsoleSink {
    fn emit(&self, entry: &LogEntry) {
        match entry.level {
            LogLevel::Debug => {
                tracing::debug!(target: "gantry::job", pipeline = %self.pipeline_uid, "{}", entry.message)
            }
            LogLevel::Info => {
                tracing::info!(target: "gantry::job", pipeline = %self.pipeline_uid, "{}", entry.message)
            }
            LogLevel::Warning => {
                tracing::warn!(target: "gantry::job", pipeline = %self.pipeline_uid, "{}", entry.message)
            }
            LogLevel::Error => {
                tracing::error!(target: "gantry::job", pipeline = %self.pipeline_uid, "{}", entry.message)
            }
        }
    }
}

/// Explicit per-pipeline logging handle
///
/// Created when a run starts and passed to every step executor; there is
/// no process-wide job logger.
pub struct JobLogger {
    sinks: Vec<Box<dyn RecordSink>>,
    assembler: Mutex<LineAssembler>,
}

impl JobLogger {
    pub fn new(sinks: Vec<Box<dyn RecordSink>>) -> Self {
        Self {
            sinks,
            assembler: Mutex::new(LineAssembler::new()),
        }
    }

    /// The standard pair of sinks: the job log file plus the console
    pub fn create(pipeline_uid: &str, log_path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(vec![
            Box::new(FileSink::create(log_path)?),
            Box::new(ConsoleSink::new(pipeline_uid)),
        ]))
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        let entry = LogEntry::now(level, message);
        for sink in &self.sinks {
            sink.emit(&entry);
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Ingests raw output bytes; completed lines are emitted, a mid-line
    /// tail is buffered for the next write
    pub fn write_bytes(&self, chunk: &[u8]) {
        let lines = self.assembler.lock().expect("assembler lock").feed(chunk);
        for line in lines {
            if !line.is_empty() {
                self.log(LogLevel::Info, &line);
            }
        }
    }

    /// Ingests a whole stream line by line until end-of-stream
    ///
    /// Uses its own line state so concurrent streams (stdout and stderr of
    /// one child) cannot interleave fragments; a final unterminated line
    /// is emitted when the stream ends.
    pub async fn read_from<R: AsyncRead + Unpin>(&self, mut reader: R) -> std::io::Result<u64> {
        let mut assembler = LineAssembler::new();
        let mut buf = [0u8; 8192];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            for line in assembler.feed(&buf[..n]) {
                if !line.is_empty() {
                    self.log(LogLevel::Info, &line);
                }
            }
        }

        if let Some(last) = assembler.flush() {
            self.log(LogLevel::Info, &last);
        }

        Ok(total)
    }
}
