//! Fan-out of instance log records to sinks.
//!
//! Each sink sees records in the order [`Logger::record`] was called for it.
//! Nothing is promised across sinks.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use mmp_proto::{LogLevel, LogMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Target of the tracing events emitted for instance records.
pub const INSTANCE_LOG_TARGET: &str = "muscle.instance";

/// A log record in its externally observable shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
	/// Submitting instance.
	pub name: String,
	/// Simulation time as an ISO-8601 UTC instant counted from the Unix epoch.
	pub time_stamp: String,
	/// Textual level, e.g. `DEBUG`.
	pub levelname: String,
	/// Message text.
	pub message: String,
	/// Parsed level.
	pub level: LogLevel,
}

impl LogRecord {
	/// Renders a submitted message.
	pub fn from_message(msg: &LogMessage) -> Self {
		Self {
			name: msg.instance_id.clone(),
			time_stamp: render_time_stamp(msg.timestamp.0),
			levelname: msg.level.as_str().to_string(),
			message: msg.text.clone(),
			level: msg.level,
		}
	}
}

impl fmt::Display for LogRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{:<24} {:<20} {:<8} {}",
			self.time_stamp, self.name, self.levelname, self.message
		)
	}
}

fn render_time_stamp(seconds: f64) -> String {
	let whole = seconds.floor();
	// Out of range and non-finite times are kept as plain numbers.
	if !whole.is_finite() || whole < i64::MIN as f64 || whole > i64::MAX as f64 {
		return seconds.to_string();
	}
	let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
	match DateTime::from_timestamp(whole as i64, nanos) {
		Some(instant) => instant.to_rfc3339_opts(SecondsFormat::AutoSi, true),
		None => seconds.to_string(),
	}
}

/// Destination for log records.
pub trait LogSink: Send + Sync + fmt::Debug {
	/// Appends one record.
	fn record(&self, record: &LogRecord) -> io::Result<()>;

	/// Pushes out anything buffered.
	fn flush(&self) -> io::Result<()> {
		Ok(())
	}
}

/// Console sink: re-emits records as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
	fn record(&self, r: &LogRecord) -> io::Result<()> {
		match r.level {
			LogLevel::Debug => {
				tracing::debug!(target: INSTANCE_LOG_TARGET, instance = %r.name, time_stamp = %r.time_stamp, "{}", r.message)
			}
			LogLevel::Info => {
				tracing::info!(target: INSTANCE_LOG_TARGET, instance = %r.name, time_stamp = %r.time_stamp, "{}", r.message)
			}
			LogLevel::Warning => {
				tracing::warn!(target: INSTANCE_LOG_TARGET, instance = %r.name, time_stamp = %r.time_stamp, "{}", r.message)
			}
			LogLevel::Error | LogLevel::Critical => {
				tracing::error!(target: INSTANCE_LOG_TARGET, instance = %r.name, time_stamp = %r.time_stamp, level = %r.levelname, "{}", r.message)
			}
		}
		Ok(())
	}
}

/// Appends one line per record to a file.
#[derive(Debug)]
pub struct FileSink {
	out: Mutex<BufWriter<File>>,
}

impl FileSink {
	/// Opens `path` for appending, creating it if needed.
	///
	/// # Errors
	///
	/// Returns the error from opening the file.
	pub fn open(path: &Path) -> io::Result<Self> {
		let file = OpenOptions::new().create(true).append(true).open(path)?;
		Ok(Self {
			out: Mutex::new(BufWriter::new(file)),
		})
	}
}

impl LogSink for FileSink {
	fn record(&self, record: &LogRecord) -> io::Result<()> {
		writeln!(self.out.lock(), "{record}")
	}

	fn flush(&self) -> io::Result<()> {
		self.out.lock().flush()
	}
}

/// Forwards records to an in-process consumer.
#[derive(Debug)]
pub struct StreamSink {
	tx: mpsc::UnboundedSender<LogRecord>,
}

impl StreamSink {
	/// Creates a sink and the receiving end of its stream.
	pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogRecord>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl LogSink for StreamSink {
	fn record(&self, record: &LogRecord) -> io::Result<()> {
		self.tx
			.send(record.clone())
			.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log stream receiver dropped"))
	}
}

/// Delivers instance log records to every configured sink.
#[derive(Debug, Clone, Default)]
pub struct Logger {
	sinks: Vec<Arc<dyn LogSink>>,
}

impl Logger {
	/// Creates a logger with no sinks.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a sink.
	#[must_use]
	pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
		self.sinks.push(Arc::new(sink));
		self
	}

	/// Appends a record to every sink.
	///
	/// A failing sink does not keep the record from the others.
	pub fn record(&self, msg: &LogMessage) -> LogRecord {
		let record = LogRecord::from_message(msg);
		for sink in &self.sinks {
			if let Err(error) = sink.record(&record) {
				tracing::warn!(?sink, %error, "log sink rejected a record");
			}
		}
		record
	}

	/// Flushes every sink.
	pub fn close(&self) {
		for sink in &self.sinks {
			if let Err(error) = sink.flush() {
				tracing::warn!(?sink, %error, "failed to flush log sink");
			}
		}
	}
}
