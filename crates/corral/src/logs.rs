//! Classification of collector stderr output.
//!
//! The collector logs tab-separated records of the form
//! `timestamp \t level \t source \t message \t payload`. Each line is mapped
//! onto the supervisor's own log levels and re-emitted with the owning
//! policy attached; lines without tab separators pass through as-is.

use serde_json::Value;

/// Supervisor log level a collector line maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
}

/// One classified collector stderr line.
pub struct CollectorLine {
	pub message: String,
	pub level: LogLevel,
	pub source: Option<String>,
	pub structured: Option<Value>,
	pub payload: Option<Value>,
}

/// Collector level token to supervisor level.
pub fn map_level(token: &str) -> LogLevel {
	match token.to_ascii_lowercase().as_str() {
		"debug" => LogLevel::Debug,
		"warn" | "warning" => LogLevel::Warn,
		"error" | "err" | "fatal" => LogLevel::Error,
		_ => LogLevel::Info,
	}
}

/// Noise the collector emits when it cannot stat its own memory-backed
/// executable; dropped before it reaches the log stream.
pub fn should_suppress(line: &str) -> bool {
	line.contains("Failed to get executable path: lstat /memfd")
}

/// Strips every byte outside `[A-Za-z0-9:(), ]` from an error line.
pub fn sanitize_error_line(line: &str) -> String {
	line.chars()
		.filter(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '(' | ')' | ',' | ' '))
		.collect()
}

pub fn parse_line(line: &str) -> CollectorLine {
	let mut parsed = CollectorLine {
		message: line.trim().to_string(),
		level: LogLevel::Info,
		source: None,
		structured: None,
		payload: None,
	};

	let parts: Vec<&str> = line.splitn(5, '\t').collect();
	if parts.len() == 1 {
		return parsed;
	}

	if let Some(level) = parts.get(1) {
		let token = level.trim();
		if !token.is_empty() {
			parsed.level = map_level(token);
		}
	}
	if let Some(source) = parts.get(2) {
		let source = source.trim();
		if !source.is_empty() {
			parsed.source = Some(source.to_string());
		}
	}
	if let Some(message) = parts.get(3) {
		let message = message.trim();
		if !message.is_empty() {
			parsed.structured = serde_json::from_str(message).ok();
			parsed.message = message.to_string();
		}
	}
	if let Some(payload) = parts.get(4) {
		let payload = payload.trim();
		if !payload.is_empty() {
			parsed.payload = Some(
				serde_json::from_str(payload)
					.unwrap_or_else(|_| Value::String(payload.to_string())),
			);
		}
	}

	parsed
}

/// Re-emits a raw collector line through the supervisor's log stream.
pub(crate) fn emit(policy: &str, line: &str) {
	let parsed = parse_line(line);
	let source = parsed.source.as_deref();
	let structured = parsed.structured.map(|v| v.to_string());
	let structured = structured.as_deref();
	let payload = parsed.payload.map(|v| match v {
		Value::String(raw) => raw,
		v => v.to_string(),
	});
	let payload = payload.as_deref();
	let message = parsed.message;

	match parsed.level {
		LogLevel::Debug => tracing::debug!(
			policy,
			collector_source = source,
			collector_message = structured,
			collector_payload = payload,
			"{message}"
		),
		LogLevel::Info => tracing::info!(
			policy,
			collector_source = source,
			collector_message = structured,
			collector_payload = payload,
			"{message}"
		),
		LogLevel::Warn => tracing::warn!(
			policy,
			collector_source = source,
			collector_message = structured,
			collector_payload = payload,
			"{message}"
		),
		LogLevel::Error => tracing::error!(
			policy,
			collector_source = source,
			collector_message = structured,
			collector_payload = payload,
			"{message}"
		),
	}
}
