//! Error type shared by every stage of the harness.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
	#[error("{0}")]
	Usage(String),

	#[error("permission denied opening {what}; run as root or lower /proc/sys/kernel/perf_event_paranoid")]
	PermissionDenied { what: String },

	#[error("no energy counters or accelerators are available on this machine")]
	NoSources,

	#[error("failed to initialize accelerator telemetry: {0}")]
	AcceleratorInit(#[from] nvml_wrapper::error::NvmlError),

	#[error("failed to read energy counter {domain}: {source}")]
	CounterRead {
		domain: String,
		#[source]
		source: io::Error,
	},

	#[error("failed to read power of accelerator {unit}: {reason}")]
	AcceleratorRead { unit: String, reason: String },

	#[error("failed to start `{program}`: {source}")]
	Spawn {
		program: String,
		#[source]
		source: io::Error,
	},

	#[error(transparent)]
	Io(#[from] io::Error),
}

impl HarnessError {
	/// Exit code reported to the caller of the harness.
	pub fn exit_code(&self) -> i32 {
		match self {
			HarnessError::Usage(_) => 2,
			_ => 1,
		}
	}
}

pub type Result<T> = std::result::Result<T, HarnessError>;
