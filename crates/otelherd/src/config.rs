/// Process-wide configuration, built once from command-line parsing and
/// passed explicitly to everything that needs it.
#[derive(Debug, Clone)]
pub struct Config {
	pub debug: bool,
	pub self_telemetry: bool,
	pub server_host: String,
	pub server_port: u16,
	pub set: Vec<String>,
	pub feature_gates: String,
	pub log_timestamp: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			debug: false,
			self_telemetry: false,
			server_host: "localhost".to_string(),
			server_port: 10222,
			set: Vec::new(),
			feature_gates: String::new(),
			log_timestamp: true,
		}
	}
}
