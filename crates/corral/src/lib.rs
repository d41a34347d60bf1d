//! # corral
//!
//! Per-policy supervision for embedded OpenTelemetry Collector processes.
//!
//! Each [`Runner`] owns one collector child: it writes the submitted policy
//! to disk, synthesizes the collector argument vector, launches the child
//! from the executable bundled into this binary, reclassifies its stderr,
//! and tracks its lifecycle state.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use corral::{Policy, Runner, SpawnOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let policy: Policy = serde_yaml::from_str(
//! 	"receivers:\n  otlp:\nexporters:\n  debug: {}\nservice:\n  pipelines: {}\n",
//! )
//! .unwrap();
//!
//! let mut runner = Runner::new("example", std::env::temp_dir(), SpawnOptions::default());
//! runner.configure(&policy).unwrap();
//!
//! let root = CancellationToken::new();
//! runner.start(&root).await.unwrap();
//! runner.stop().await;
//! # }
//! ```

pub mod embedded;
pub mod error;
pub mod logs;
pub mod runner;
pub mod types;

pub use embedded::{EmbeddedCollector, get_capabilities};
pub use error::{ConfigError, EmbedError, InvalidPolicy, StartError};
pub use runner::{Runner, SpawnOptions};
pub use types::{Policy, RunnerState, RunnerStatus};
