use std::env;
use std::fs;
use std::path::PathBuf;

// Stand-in for the bundled collector when no real executable is supplied.
// It answers the `components` self-description query and holds a `--config`
// run open until it is killed, rejecting configs that lack the sections a
// real collector requires.
const COLLECTOR_STUB: &str = r#"#!/bin/sh

if [ "$1" = "components" ]; then
	cat <<'EOF'
buildinfo:
  command: otelcol-contrib
  description: OpenTelemetry Collector Contrib
  version: 0.127.0
receivers:
  - name: otlp
  - name: prometheus
processors:
  - name: batch
exporters:
  - name: debug
  - name: otlphttp
extensions:
  - name: health_check
EOF
	exit 0
fi

config=""
while [ $# -gt 0 ]; do
	case "$1" in
	--config)
		config="$2"
		shift 2
		;;
	*)
		shift
		;;
	esac
done

if [ -z "$config" ] || [ ! -r "$config" ]; then
	echo "Error: failed to get config: cannot read the configuration file" >&2
	exit 1
fi

for section in receivers exporters service; do
	if ! grep -q "^${section}:" "$config" || grep -q "^${section}: null" "$config"; then
		echo "Error: invalid configuration: ${section} not found" >&2
		exit 1
	fi
done

exec sleep 2147483647
"#;

fn main() {
	println!("cargo:rerun-if-env-changed=OTELCOL_CONTRIB");

	let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
	let dest = out_dir.join("otelcol-contrib");

	if let Ok(source) = env::var("OTELCOL_CONTRIB") {
		println!("cargo:rerun-if-changed={source}");
		fs::copy(&source, &dest)
			.unwrap_or_else(|e| panic!("failed to copy collector from {source}: {e}"));
	} else {
		fs::write(&dest, COLLECTOR_STUB).expect("failed to write collector stub");
	}
}
