use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A submitted policy bundle failed structural validation.
#[derive(Debug, Error)]
pub enum InvalidPolicy {
	#[error("policy is missing required section '{0}'")]
	MissingSection(&'static str),
	#[error("policy section '{0}' must be a mapping")]
	NotAMapping(&'static str),
	#[error("policy section '{0}' must not be empty")]
	EmptySection(&'static str),
}

/// Errors raised while writing a policy to disk and synthesizing the
/// collector argument vector.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to serialize policy '{name}': {source}")]
	Serialize {
		name: String,
		source: serde_yaml::Error,
	},
	#[error("failed to create policy file for '{name}' in {}: {source}", dir.display())]
	PolicyFile {
		name: String,
		dir: PathBuf,
		source: io::Error,
	},
}

/// Errors raised while launching a policy's collector child.
#[derive(Debug, Error)]
pub enum StartError {
	#[error(transparent)]
	Embed(#[from] EmbedError),
	#[error("runner for '{0}' was started before it was configured")]
	NotConfigured(String),
	#[error("failed to launch collector process: {0}")]
	Launch(io::Error),
	#[error("otelcol-contrib - {0}")]
	Startup(String),
}

/// Errors raised by the embedded-executable loader.
#[derive(Debug, Error)]
pub enum EmbedError {
	#[error("failed to materialize collector executable: {0}")]
	Materialize(io::Error),
	#[error("failed to invoke collector executable: {0}")]
	Invoke(io::Error),
	#[error("collector components query failed: {stderr}")]
	Components { stderr: String },
}
