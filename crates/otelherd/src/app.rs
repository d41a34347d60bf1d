use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use corral::{EmbedError, Policy, Runner, SpawnOptions};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::config::Config;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Fatal supervisor startup failures. The caller cleans up and exits.
#[derive(Debug, Error)]
pub enum StartupError {
	#[error("failed to create policies directory under {}: {source}", root.display())]
	PoliciesDir {
		root: PathBuf,
		source: std::io::Error,
	},
	#[error(transparent)]
	Capabilities(#[from] EmbedError),
	#[error("failed to parse collector capabilities: {0}")]
	ParseCapabilities(#[from] serde_yaml::Error),
	#[error("failed to bind {addr}: {source}")]
	Bind {
		addr: String,
		source: std::io::Error,
	},
}

/// Failures answering control-plane requests.
#[derive(Debug, Error)]
pub enum ApiError {
	#[error("invalid Content-Type. Only 'application/x-yaml' is supported")]
	UnsupportedContentType,
	#[error(transparent)]
	Decode(serde_yaml::Error),
	#[error("policy names must be strings")]
	BadName,
	#[error("policy '{0}' already exists")]
	Conflict(String),
	#[error("policy not found")]
	NotFound,
	#[error("policy manager is not running")]
	NotRunning,
	#[error("{0}")]
	Capabilities(String),
	#[error(transparent)]
	Invalid(#[from] corral::InvalidPolicy),
	#[error(transparent)]
	Config(#[from] corral::ConfigError),
	#[error(transparent)]
	Start(#[from] corral::StartError),
}

impl ApiError {
	pub fn status_code(&self) -> StatusCode {
		match self {
			ApiError::Conflict(_) => StatusCode::CONFLICT,
			ApiError::NotFound => StatusCode::NOT_FOUND,
			_ => StatusCode::BAD_REQUEST,
		}
	}
}

/// A registered policy: the bundle as submitted plus the runner owning its
/// collector child.
pub struct PolicyEntry {
	pub policy: Policy,
	pub runner: Runner,
}

/// Wire shape of one policy in YAML responses.
#[derive(Serialize)]
pub struct PolicyView {
	pub status: corral::RunnerState,
	#[serde(flatten)]
	pub policy: Policy,
}

/// Read-only service status.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
	pub start_time: DateTime<Utc>,
	pub up_time: Duration,
	pub version: String,
}

#[derive(Debug, Default, Deserialize)]
struct CapabilitiesDoc {
	#[serde(default)]
	buildinfo: BuildInfo,
}

#[derive(Debug, Default, Deserialize)]
struct BuildInfo {
	#[serde(default)]
	version: String,
}

/// The supervisor root: owns the policy registry, the policies scratch
/// directory, the cached capabilities document and the HTTP control plane.
pub struct App {
	pub config: Config,
	policies: RwLock<HashMap<String, PolicyEntry>>,
	// Serializes POST admissions so the uniqueness check and the final
	// insert form one critical section without holding the registry lock
	// across a settle window.
	admission: Mutex<()>,
	started_at: RwLock<DateTime<Utc>>,
	version: RwLock<String>,
	capabilities: RwLock<Vec<u8>>,
	policies_dir: Mutex<Option<TempDir>>,
	token: CancellationToken,
	http_token: CancellationToken,
	server: Mutex<Option<JoinHandle<()>>>,
}

impl App {
	pub fn new(config: Config) -> Arc<Self> {
		Arc::new(Self {
			config,
			policies: RwLock::new(HashMap::new()),
			admission: Mutex::new(()),
			started_at: RwLock::new(Utc::now()),
			version: RwLock::new(String::new()),
			capabilities: RwLock::new(Vec::new()),
			policies_dir: Mutex::new(None),
			token: CancellationToken::new(),
			http_token: CancellationToken::new(),
			server: Mutex::new(None),
		})
	}

	/// Brings the supervisor up: policies scratch directory, capabilities
	/// query, HTTP control plane. Post-bind server failures arrive on the
	/// returned channel.
	pub async fn start(self: &Arc<Self>) -> Result<mpsc::Receiver<std::io::Error>, StartupError> {
		*self.started_at.write().await = Utc::now();

		let root = std::env::temp_dir();
		let dir = tempfile::Builder::new()
			.prefix("policies")
			.tempdir()
			.map_err(|source| StartupError::PoliciesDir {
				root: root.clone(),
				source,
			})?;
		*self.policies_dir.lock().await = Some(dir);

		if let Err(e) = self.fetch_capabilities().await {
			self.remove_policies_dir().await;
			return Err(e);
		}

		let addr = format!("{}:{}", self.config.server_host, self.config.server_port);
		let listener = match TcpListener::bind(&addr).await {
			Ok(listener) => listener,
			Err(source) => {
				self.remove_policies_dir().await;
				return Err(StartupError::Bind { addr, source });
			}
		};
		tracing::info!(addr = addr.as_str(), "otelherd control plane listening");

		let router = api::router(Arc::clone(self));
		let (err_tx, err_rx) = mpsc::channel(1);
		let shutdown = self.http_token.clone();
		let handle = tokio::spawn(async move {
			let serve = axum::serve(listener, router)
				.with_graceful_shutdown(async move { shutdown.cancelled().await });
			if let Err(e) = serve.await {
				let _ = err_tx.send(e).await;
			}
		});
		*self.server.lock().await = Some(handle);

		Ok(err_rx)
	}

	/// Tears the supervisor down: HTTP server first, then every runner, then
	/// the policies directory. Safe to call more than once.
	pub async fn stop(&self) {
		self.http_token.cancel();
		if let Some(handle) = self.server.lock().await.take() {
			if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
				tracing::error!("HTTP server did not shut down within the grace period");
			}
		}

		let entries: Vec<(String, PolicyEntry)> = self.policies.write().await.drain().collect();
		for (name, entry) in entries {
			entry.runner.stop().await;
			tracing::debug!(policy = name.as_str(), "policy stopped during shutdown");
		}

		self.remove_policies_dir().await;
		self.token.cancel();
	}

	pub async fn status(&self) -> Status {
		let start_time = *self.started_at.read().await;
		Status {
			start_time,
			up_time: (Utc::now() - start_time).to_std().unwrap_or_default(),
			version: self.version.read().await.clone(),
		}
	}

	pub async fn capabilities(&self) -> Vec<u8> {
		self.capabilities.read().await.clone()
	}

	pub async fn policy_names(&self) -> Vec<String> {
		self.policies.read().await.keys().cloned().collect()
	}

	pub async fn policy_view(&self, name: &str) -> Option<PolicyView> {
		let policies = self.policies.read().await;
		let entry = policies.get(name)?;
		Some(PolicyView {
			status: entry.runner.status().await,
			policy: entry.policy.clone(),
		})
	}

	pub async fn delete_policy(&self, name: &str) -> Result<(), ApiError> {
		let entry = self
			.policies
			.write()
			.await
			.remove(name)
			.ok_or(ApiError::NotFound)?;
		entry.runner.stop().await;
		tracing::info!(policy = name, "policy deleted");
		Ok(())
	}

	/// Admits every policy in `payload` or none of them. Policies are
	/// processed in submission order; on any failure the runners already
	/// started by this request are stopped and nothing is registered.
	pub async fn create_policies(
		&self,
		payload: serde_yaml::Mapping,
	) -> Result<BTreeMap<String, PolicyView>, ApiError> {
		let _admission = self.admission.lock().await;

		let mut submitted: Vec<(String, Policy)> = Vec::with_capacity(payload.len());
		for (name, value) in payload {
			let name = name.as_str().ok_or(ApiError::BadName)?.to_string();
			let policy: Policy = serde_yaml::from_value(value).map_err(ApiError::Decode)?;
			submitted.push((name, policy));
		}

		{
			let policies = self.policies.read().await;
			for (name, _) in &submitted {
				if policies.contains_key(name) {
					return Err(ApiError::Conflict(name.clone()));
				}
			}
		}

		let dir = self.policies_path().await.ok_or(ApiError::NotRunning)?;
		let options = SpawnOptions {
			self_telemetry: self.config.self_telemetry,
			feature_gates: self.config.feature_gates.clone(),
			set: self.config.set.clone(),
		};

		let mut admitted: Vec<(String, PolicyEntry)> = Vec::with_capacity(submitted.len());
		for (name, policy) in submitted {
			match self.admit_one(&name, &policy, &dir, options.clone()).await {
				Ok(runner) => admitted.push((name, PolicyEntry { policy, runner })),
				Err(e) => {
					for (name, entry) in &admitted {
						entry.runner.stop().await;
						tracing::warn!(
							policy = name.as_str(),
							"rolled back policy after failed admission"
						);
					}
					return Err(e);
				}
			}
		}

		let mut views = BTreeMap::new();
		let mut policies = self.policies.write().await;
		for (name, entry) in admitted {
			views.insert(
				name.clone(),
				PolicyView {
					status: entry.runner.status().await,
					policy: entry.policy.clone(),
				},
			);
			policies.insert(name, entry);
		}
		Ok(views)
	}

	async fn admit_one(
		&self,
		name: &str,
		policy: &Policy,
		dir: &Path,
		options: SpawnOptions,
	) -> Result<Runner, ApiError> {
		policy.validate()?;
		let mut runner = Runner::new(name, dir, options);
		runner.configure(policy)?;
		runner.start(&self.token).await?;
		Ok(runner)
	}

	async fn fetch_capabilities(&self) -> Result<(), StartupError> {
		let raw = corral::get_capabilities().await?;
		let doc: CapabilitiesDoc = serde_yaml::from_slice(&raw)?;
		*self.version.write().await = doc.buildinfo.version;
		*self.capabilities.write().await = raw;
		Ok(())
	}

	async fn policies_path(&self) -> Option<PathBuf> {
		self.policies_dir
			.lock()
			.await
			.as_ref()
			.map(|dir| dir.path().to_path_buf())
	}

	async fn remove_policies_dir(&self) {
		if let Some(dir) = self.policies_dir.lock().await.take() {
			if let Err(e) = dir.close() {
				tracing::error!(error = %e, "failed to remove policies directory");
			}
		}
	}
}
