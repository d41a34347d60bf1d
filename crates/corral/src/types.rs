use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidPolicy;

/// A named collector configuration bundle as submitted by a client.
///
/// Section contents are opaque to the supervisor; only the collector child
/// interprets them. The required sections still serialize when absent so the
/// collector sees the shape it was given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
	pub receivers: Option<serde_yaml::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub processors: Option<serde_yaml::Value>,
	pub exporters: Option<serde_yaml::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub extensions: Option<serde_yaml::Value>,
	pub service: Option<serde_yaml::Value>,
}

impl Policy {
	/// Checks the structural requirements a bundle must meet before a
	/// collector is spawned for it: `receivers` and `exporters` present and
	/// non-empty, `service` present.
	pub fn validate(&self) -> Result<(), InvalidPolicy> {
		require_mapping("receivers", &self.receivers, true)?;
		require_mapping("exporters", &self.exporters, true)?;
		require_mapping("service", &self.service, false)?;
		Ok(())
	}
}

fn require_mapping(
	section: &'static str,
	value: &Option<serde_yaml::Value>,
	non_empty: bool,
) -> Result<(), InvalidPolicy> {
	let value = value
		.as_ref()
		.ok_or(InvalidPolicy::MissingSection(section))?;
	let mapping = value
		.as_mapping()
		.ok_or(InvalidPolicy::NotAMapping(section))?;
	if non_empty && mapping.is_empty() {
		return Err(InvalidPolicy::EmptySection(section));
	}
	Ok(())
}

/// Lifecycle state of a policy's collector child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
	Unknown,
	Running,
	RunnerError,
	Offline,
}

impl RunnerStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			RunnerStatus::Unknown => "unknown",
			RunnerStatus::Running => "running",
			RunnerStatus::RunnerError => "runner_error",
			RunnerStatus::Offline => "offline",
		}
	}
}

/// Snapshot of a runner, serialized into policy status responses.
///
/// `restart_count` and `last_restart_time` are carried for wire stability;
/// nothing updates them until a restart policy exists.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerState {
	#[serde(skip)]
	pub status: RunnerStatus,
	#[serde(rename = "status")]
	pub status_text: &'static str,
	#[serde(skip)]
	pub start_time: Option<DateTime<Utc>>,
	pub restart_count: i64,
	#[serde(skip)]
	pub last_log: String,
	pub last_error: String,
	pub last_restart_time: Option<DateTime<Utc>>,
}

impl RunnerState {
	/// Moves the runner to `status`, keeping the text label in lockstep.
	pub(crate) fn set_status(&mut self, status: RunnerStatus) {
		self.status = status;
		self.status_text = status.as_str();
	}
}

impl Default for RunnerState {
	fn default() -> Self {
		Self {
			status: RunnerStatus::Unknown,
			status_text: RunnerStatus::Unknown.as_str(),
			start_time: None,
			restart_count: 0,
			last_log: String::new(),
			last_error: String::new(),
			last_restart_time: None,
		}
	}
}
