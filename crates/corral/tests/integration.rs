use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use corral::logs::{self, LogLevel};
use corral::{Policy, Runner, RunnerStatus, SpawnOptions};
use tokio_util::sync::CancellationToken;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> std::path::PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("corral-test-{}-{}", n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

fn full_policy() -> Policy {
	serde_yaml::from_str(
		r#"
receivers:
  otlp:
    protocols:
      http:
      grpc:
exporters:
  debug: {}
service:
  pipelines:
    metrics:
      receivers: [otlp]
      exporters: [debug]
"#,
	)
	.unwrap()
}

fn partial_policy() -> Policy {
	serde_yaml::from_str("receivers:\n  otlp:\n").unwrap()
}

// --- Policy validation ---

#[test]
fn policy_validate_requires_sections() {
	assert!(full_policy().validate().is_ok());

	let err = partial_policy().validate().unwrap_err();
	assert!(err.to_string().contains("exporters"), "error was: {err}");

	let no_receivers: Policy = serde_yaml::from_str("feature_gates: [all]\n").unwrap();
	let err = no_receivers.validate().unwrap_err();
	assert!(err.to_string().contains("receivers"), "error was: {err}");

	let empty: Policy =
		serde_yaml::from_str("receivers: {}\nexporters:\n  debug: {}\nservice: {}\n").unwrap();
	assert!(empty.validate().is_err());
}

// --- Runner state wire shape ---

#[tokio::test]
async fn state_serializes_wire_fields() {
	let dir = temp_dir("state");
	let runner = Runner::new("test-policy", &dir, SpawnOptions::default());

	let state = runner.status().await;
	assert_eq!(state.status, RunnerStatus::Unknown);
	assert_eq!(state.status_text, "unknown");
	assert_eq!(state.restart_count, 0);

	let yaml = serde_yaml::to_string(&state).unwrap();
	assert!(yaml.contains("status: unknown"), "yaml was: {yaml}");
	assert!(yaml.contains("restart_count: 0"));
	assert!(yaml.contains("last_restart_time: null"));
	assert!(!yaml.contains("last_log"));

	let _ = std::fs::remove_dir_all(&dir);
}

// --- Configure ---

#[test]
fn configure_writes_policy_file() {
	let dir = temp_dir("configure");
	let mut runner = Runner::new("test-policy", &dir, SpawnOptions::default());
	runner.configure(&full_policy()).unwrap();

	let file = runner.policy_file().unwrap();
	assert!(file.starts_with(&dir));
	let name = file.file_name().unwrap().to_string_lossy().into_owned();
	assert!(name.starts_with("test-policy-"), "file was: {name}");
	let contents = std::fs::read_to_string(file).unwrap();
	assert!(contents.contains("receivers:"));
	assert!(contents.contains("otlp:"));

	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn configure_synthesizes_collector_args() {
	let dir = temp_dir("args");
	let options = SpawnOptions {
		self_telemetry: false,
		feature_gates: "gate1,gate2".to_string(),
		set: vec!["set1=a".to_string(), "set2=b".to_string()],
	};
	let mut runner = Runner::new("test-policy", &dir, options);
	runner.configure(&full_policy()).unwrap();

	let args = runner.args();
	assert_eq!(args[0], "--config");
	assert!(args[1].contains("test-policy"));
	assert_eq!(args[2], "--set=service.telemetry.metrics.level=None");
	assert_eq!(args[3], "--feature-gates");
	assert_eq!(args[4], "gate1,gate2");
	assert_eq!(args[5], "--set=set1=a");
	assert_eq!(args[6], "--set=set2=b");

	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn configure_with_self_telemetry_keeps_metrics() {
	let dir = temp_dir("self-telemetry");
	let options = SpawnOptions {
		self_telemetry: true,
		..SpawnOptions::default()
	};
	let mut runner = Runner::new("test-policy", &dir, options);
	runner.configure(&full_policy()).unwrap();

	assert!(
		!runner
			.args()
			.iter()
			.any(|a| a == "--set=service.telemetry.metrics.level=None")
	);

	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn configure_invalid_dir_fails_without_leftovers() {
	let dir = temp_dir("invalid-dir").join("missing/sub");
	let mut runner = Runner::new("test-policy", &dir, SpawnOptions::default());

	let err = runner.configure(&full_policy()).unwrap_err();
	assert!(err.to_string().contains("missing/sub"), "error was: {err}");
	assert!(runner.policy_file().is_none());
	assert!(!dir.exists());
}

// --- Capabilities ---

#[tokio::test]
async fn capabilities_report_build_version() {
	let caps = corral::get_capabilities().await.unwrap();
	let doc: serde_yaml::Value = serde_yaml::from_slice(&caps).unwrap();
	let version = doc
		.get("buildinfo")
		.and_then(|b| b.get("version"))
		.and_then(|v| v.as_str())
		.unwrap_or_default();
	assert!(!version.is_empty(), "capabilities were: {doc:?}");
}

// --- Start / stop lifecycle ---

#[tokio::test]
async fn start_and_stop_lifecycle() {
	let dir = temp_dir("lifecycle");
	let mut runner = Runner::new("test-policy", &dir, SpawnOptions::default());
	runner.configure(&full_policy()).unwrap();

	let root = CancellationToken::new();
	runner.start(&root).await.unwrap();

	let state = runner.status().await;
	assert_eq!(state.status, RunnerStatus::Running);
	assert_eq!(state.status_text, "running");
	assert!(state.start_time.is_some());
	assert!(runner.pid().is_some());

	runner.stop().await;
	let state = runner.status().await;
	assert_eq!(state.status, RunnerStatus::Offline);
	assert_eq!(state.status_text, "offline");

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn stop_is_idempotent() {
	let dir = temp_dir("stop-twice");
	let mut runner = Runner::new("test-policy", &dir, SpawnOptions::default());
	runner.configure(&full_policy()).unwrap();

	let root = CancellationToken::new();
	runner.start(&root).await.unwrap();

	runner.stop().await;
	runner.stop().await;
	assert_eq!(runner.status().await.status, RunnerStatus::Offline);

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn start_unconfigured_runner_fails() {
	let dir = temp_dir("unconfigured");
	let mut runner = Runner::new("test-policy", &dir, SpawnOptions::default());

	let root = CancellationToken::new();
	let err = runner.start(&root).await.unwrap_err();
	assert!(err.to_string().contains("configured"), "error was: {err}");

	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn start_reports_sanitized_collector_error() {
	let dir = temp_dir("start-error");
	let mut runner = Runner::new("test-policy", &dir, SpawnOptions::default());
	runner.configure(&partial_policy()).unwrap();

	let root = CancellationToken::new();
	let err = runner.start(&root).await.unwrap_err();
	let message = err.to_string();
	assert!(
		message.starts_with("otelcol-contrib - "),
		"error was: {message}"
	);
	let tail = message.strip_prefix("otelcol-contrib - ").unwrap();
	assert!(!tail.is_empty());
	assert!(
		tail.chars()
			.all(|c| c.is_ascii_alphanumeric() || ":(), ".contains(c)),
		"unsanitized tail: {tail}"
	);

	let _ = std::fs::remove_dir_all(&dir);
}

// --- Post-startup failure ---

#[tokio::test]
async fn crash_after_startup_sets_runner_error() {
	use nix::sys::signal::{Signal, killpg};
	use nix::unistd::Pid;

	let dir = temp_dir("crash");
	let mut runner = Runner::new("test-policy", &dir, SpawnOptions::default());
	runner.configure(&full_policy()).unwrap();

	let root = CancellationToken::new();
	runner.start(&root).await.unwrap();
	let pid = runner.pid().unwrap();

	killpg(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
	tokio::time::sleep(Duration::from_millis(500)).await;

	let state = runner.status().await;
	assert_eq!(state.status, RunnerStatus::RunnerError);
	assert_eq!(state.status_text, "runner_error");
	assert!(
		state.last_error.starts_with("otelcol-contrib - "),
		"last_error was: {}",
		state.last_error
	);

	runner.stop().await;
	let _ = std::fs::remove_dir_all(&dir);
}

// --- Collector log classification ---

#[test]
fn log_level_table() {
	assert_eq!(logs::map_level("debug"), LogLevel::Debug);
	assert_eq!(logs::map_level("DEBUG"), LogLevel::Debug);
	assert_eq!(logs::map_level("warn"), LogLevel::Warn);
	assert_eq!(logs::map_level("warning"), LogLevel::Warn);
	assert_eq!(logs::map_level("error"), LogLevel::Error);
	assert_eq!(logs::map_level("err"), LogLevel::Error);
	assert_eq!(logs::map_level("fatal"), LogLevel::Error);
	assert_eq!(logs::map_level("info"), LogLevel::Info);
	assert_eq!(logs::map_level("anything else"), LogLevel::Info);
}

#[test]
fn log_parse_structured_line() {
	let parsed = logs::parse_line(
		"2026-05-01T00:00:00.000Z\terror\tscraper@v0.127.0\tscrape failed\t{\"kind\": \"receiver\"}",
	);
	assert_eq!(parsed.level, LogLevel::Error);
	assert_eq!(parsed.source.as_deref(), Some("scraper@v0.127.0"));
	assert_eq!(parsed.message, "scrape failed");
	assert!(parsed.structured.is_none());
	assert_eq!(parsed.payload.unwrap()["kind"], "receiver");
}

#[test]
fn log_parse_json_message() {
	let parsed = logs::parse_line("ts\tinfo\tsrc\t{\"event\": \"ready\"}\t");
	assert_eq!(parsed.level, LogLevel::Info);
	assert_eq!(parsed.structured.unwrap()["event"], "ready");
}

#[test]
fn log_parse_plain_line() {
	let parsed = logs::parse_line("plain collector output");
	assert_eq!(parsed.level, LogLevel::Info);
	assert_eq!(parsed.message, "plain collector output");
	assert!(parsed.source.is_none());
	assert!(parsed.payload.is_none());
}

#[test]
fn log_payload_falls_back_to_raw_string() {
	let parsed = logs::parse_line("ts\tinfo\tsrc\tmsg\tnot json at all");
	assert_eq!(
		parsed.payload,
		Some(serde_json::Value::String("not json at all".to_string()))
	);
}

#[test]
fn log_suppression_rule() {
	assert!(logs::should_suppress(
		"Failed to get executable path: lstat /memfd:otelcol-contrib (deleted)"
	));
	assert!(!logs::should_suppress("ordinary collector line"));
}

#[test]
fn sanitizer_strips_disallowed_bytes() {
	assert_eq!(
		logs::sanitize_error_line("error: bad config {\"a\": 1} @ /tmp/x\n"),
		"error: bad config a: 1  tmpx"
	);
	assert_eq!(
		logs::sanitize_error_line("keep (these), and: digits 123"),
		"keep (these), and: digits 123"
	);
	assert_eq!(logs::sanitize_error_line(""), "");
}
