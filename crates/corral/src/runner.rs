use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::embedded::EmbeddedCollector;
use crate::error::{ConfigError, StartError};
use crate::logs;
use crate::types::{Policy, RunnerState, RunnerStatus};

/// How long a freshly launched collector may settle before its first error
/// line stops failing the start call.
const SETTLE_WINDOW: Duration = Duration::from_secs(1);

/// Spawn-time options shared by every runner, distilled from the daemon
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
	pub self_telemetry: bool,
	pub feature_gates: String,
	pub set: Vec<String>,
}

/// Supervises one collector child bound to one policy.
///
/// `configure` writes the policy into the policies directory and synthesizes
/// the collector argument vector; `start` launches the child and watches its
/// first second of stderr; `stop` terminates it. State transitions are
/// `unknown` → `running` → `runner_error` (a post-startup error line) and
/// `offline` once stopped.
pub struct Runner {
	policy_name: String,
	policy_dir: PathBuf,
	options: SpawnOptions,
	policy_file: Option<PathBuf>,
	args: Vec<String>,
	state: Arc<RwLock<RunnerState>>,
	token: CancellationToken,
	pid: Option<u32>,
}

impl Runner {
	pub fn new(
		policy_name: impl Into<String>,
		policy_dir: impl Into<PathBuf>,
		options: SpawnOptions,
	) -> Self {
		Self {
			policy_name: policy_name.into(),
			policy_dir: policy_dir.into(),
			options,
			policy_file: None,
			args: Vec::new(),
			state: Arc::new(RwLock::new(RunnerState::default())),
			token: CancellationToken::new(),
			pid: None,
		}
	}

	/// Serializes the policy into the policies directory and synthesizes the
	/// collector argument vector.
	pub fn configure(&mut self, policy: &Policy) -> Result<(), ConfigError> {
		let rendered =
			serde_yaml::to_string(policy).map_err(|source| ConfigError::Serialize {
				name: self.policy_name.clone(),
				source,
			})?;

		let mut file = tempfile::Builder::new()
			.prefix(&format!("{}-", self.policy_name))
			.suffix(".yaml")
			.tempfile_in(&self.policy_dir)
			.map_err(|source| self.policy_file_error(source))?;
		file.write_all(rendered.as_bytes())
			.map_err(|source| self.policy_file_error(source))?;
		let (_, path) = file
			.keep()
			.map_err(|e| self.policy_file_error(e.error))?;

		let mut args = vec!["--config".to_string(), path.display().to_string()];
		if !self.options.self_telemetry {
			args.push("--set=service.telemetry.metrics.level=None".to_string());
		}
		if !self.options.feature_gates.is_empty() {
			args.push("--feature-gates".to_string());
			args.push(self.options.feature_gates.clone());
		}
		for set in &self.options.set {
			args.push(format!("--set={set}"));
		}

		self.policy_file = Some(path);
		self.args = args;
		Ok(())
	}

	/// Launches the collector child. The child lives until `parent` (or the
	/// runner itself) is cancelled.
	///
	/// A stderr line arriving within the settle window fails the start with
	/// the sanitized line; later errors flip the runner to `runner_error`
	/// instead.
	pub async fn start(&mut self, parent: &CancellationToken) -> Result<(), StartError> {
		if self.policy_file.is_none() {
			return Err(StartError::NotConfigured(self.policy_name.clone()));
		}
		self.token = parent.child_token();

		let exec = EmbeddedCollector::materialize()?;
		let mut command = exec.command();
		command
			.args(&self.args)
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.process_group(0);

		let mut child = command.spawn().map_err(StartError::Launch)?;
		drop(exec);

		let pid = child.id();
		self.pid = pid;

		let Some(stderr) = child.stderr.take() else {
			return Err(StartError::Launch(std::io::Error::other(
				"collector stderr was not captured",
			)));
		};

		let scan_state = Arc::clone(&self.state);
		let scan_policy = self.policy_name.clone();
		let scanner = tokio::spawn(async move {
			let mut lines = BufReader::new(stderr).lines();
			while let Ok(Some(line)) = lines.next_line().await {
				if logs::should_suppress(&line) {
					continue;
				}
				scan_state.write().await.last_log = line.clone();
				logs::emit(&scan_policy, &line);
			}
		});

		// On a failed exit the waiter forwards the final stderr line; on
		// cancellation it takes the process group down.
		let (err_tx, mut err_rx) = mpsc::channel::<String>(1);
		let wait_state = Arc::clone(&self.state);
		let wait_token = self.token.clone();
		tokio::spawn(async move {
			tokio::select! {
				status = child.wait() => {
					let clean = status.as_ref().map(|s| s.success()).unwrap_or(false);
					let _ = scanner.await;
					if !clean {
						let line = wait_state.read().await.last_log.clone();
						let _ = err_tx.send(line).await;
					}
				}
				_ = wait_token.cancelled() => {
					if let Some(pid) = pid {
						kill_process_tree(pid);
					}
					let _ = child.wait().await;
					let _ = scanner.await;
				}
			}
		});

		self.state.write().await.start_time = Some(Utc::now());

		let settle = tokio::time::sleep(SETTLE_WINDOW);
		tokio::pin!(settle);
		let mut channel_open = true;
		loop {
			tokio::select! {
				line = err_rx.recv(), if channel_open => {
					match line {
						Some(line) => {
							return Err(StartError::Startup(logs::sanitize_error_line(&line)));
						}
						// Channel closed without an error line: the child
						// ended cleanly. Wait out the timer regardless.
						None => channel_open = false,
					}
				}
				_ = &mut settle => {
					self.set_status(RunnerStatus::Running).await;
					tracing::info!(
						policy = self.policy_name.as_str(),
						pid,
						"runner process started successfully"
					);
					break;
				}
			}
		}

		let watch_state = Arc::clone(&self.state);
		let watch_token = self.token.clone();
		let watch_policy = self.policy_name.clone();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					biased;
					_ = watch_token.cancelled() => {
						mark_stopped(&watch_state, &watch_policy).await;
						break;
					}
					line = err_rx.recv() => {
						let Some(line) = line else { break };
						let mut state = watch_state.write().await;
						state.last_error =
							format!("otelcol-contrib - {}", logs::sanitize_error_line(&line));
						state.set_status(RunnerStatus::RunnerError);
					}
				}
			}
		});

		Ok(())
	}

	/// Stops the collector child and marks the runner offline. Safe to call
	/// any number of times.
	pub async fn stop(&self) {
		self.token.cancel();
		mark_stopped(&self.state, &self.policy_name).await;
	}

	/// Point-in-time snapshot of the runner state.
	pub async fn status(&self) -> RunnerState {
		self.state.read().await.clone()
	}

	pub fn policy_file(&self) -> Option<&Path> {
		self.policy_file.as_deref()
	}

	pub fn args(&self) -> &[String] {
		&self.args
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	async fn set_status(&self, status: RunnerStatus) {
		self.state.write().await.set_status(status);
	}

	fn policy_file_error(&self, source: std::io::Error) -> ConfigError {
		ConfigError::PolicyFile {
			name: self.policy_name.clone(),
			dir: self.policy_dir.clone(),
			source,
		}
	}
}

async fn mark_stopped(state: &RwLock<RunnerState>, policy: &str) {
	state.write().await.set_status(RunnerStatus::Offline);
	tracing::info!(policy, "runner process stopped");
}

/// SIGTERM the child's process group, escalating to SIGKILL shortly after.
fn kill_process_tree(pid: u32) {
	use nix::sys::signal::{Signal, killpg};
	use nix::unistd::Pid;

	let pgid = Pid::from_raw(pid as i32);
	let _ = killpg(pgid, Signal::SIGTERM);
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_secs(3)).await;
		let _ = killpg(pgid, Signal::SIGKILL);
	});
}
