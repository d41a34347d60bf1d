use std::fs::{self, File};
use std::path::PathBuf;

use tokio::process::Command;

use crate::error::EmbedError;

static COLLECTOR_BYTES: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/otelcol-contrib"));

/// The bundled collector executable, materialized so children can be spawned
/// from it.
///
/// On Linux the bytes live in an anonymous memory-backed file and children
/// are spawned through `/proc/self/fd`; elsewhere, or when the kernel
/// refuses the anonymous file, they land in a private mode-0700 scratch
/// directory. Dropping the handle releases the backing file.
pub struct EmbeddedCollector {
	backing: Backing,
}

enum Backing {
	#[cfg(target_os = "linux")]
	Memfd(File),
	Dir {
		// Held for its Drop; `path` lives inside it.
		_dir: tempfile::TempDir,
		path: PathBuf,
	},
}

impl EmbeddedCollector {
	pub fn materialize() -> Result<Self, EmbedError> {
		#[cfg(target_os = "linux")]
		if let Ok(file) = memfd_backing() {
			return Ok(Self {
				backing: Backing::Memfd(file),
			});
		}
		let (dir, path) = dir_backing().map_err(EmbedError::Materialize)?;
		Ok(Self {
			backing: Backing::Dir { _dir: dir, path },
		})
	}

	/// A command pinned to the materialized executable. The handle must stay
	/// alive until the child has been spawned.
	pub fn command(&self) -> Command {
		Command::new(self.program())
	}

	fn program(&self) -> PathBuf {
		match &self.backing {
			#[cfg(target_os = "linux")]
			Backing::Memfd(file) => {
				use std::os::fd::AsRawFd;
				PathBuf::from(format!("/proc/self/fd/{}", file.as_raw_fd()))
			}
			Backing::Dir { path, .. } => path.clone(),
		}
	}
}

#[cfg(target_os = "linux")]
fn memfd_backing() -> std::io::Result<File> {
	use std::io::Write;

	use nix::sys::memfd::{MemFdCreateFlag, memfd_create};

	// No MFD_CLOEXEC: the descriptor must survive into the child so the
	// kernel can resolve /proc/self/fd/<n> while executing the image.
	let fd = memfd_create(c"otelcol-contrib", MemFdCreateFlag::empty())
		.map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
	let mut file = File::from(fd);
	file.write_all(COLLECTOR_BYTES)?;
	Ok(file)
}

fn dir_backing() -> std::io::Result<(tempfile::TempDir, PathBuf)> {
	let dir = tempfile::Builder::new().prefix("otelherd-exec").tempdir()?;
	let path = dir.path().join("otelcol-contrib");
	fs::write(&path, COLLECTOR_BYTES)?;
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700))?;
		fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
	}
	Ok((dir, path))
}

/// Runs the embedded collector's `components` self-description and returns
/// the raw YAML it prints.
pub async fn get_capabilities() -> Result<Vec<u8>, EmbedError> {
	let exec = EmbeddedCollector::materialize()?;
	let output = exec
		.command()
		.arg("components")
		.output()
		.await
		.map_err(EmbedError::Invoke)?;
	if !output.status.success() {
		return Err(EmbedError::Components {
			stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
		});
	}
	Ok(output.stdout)
}
