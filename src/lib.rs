pub mod accelerator;
pub mod child;
pub mod cli;
pub mod config;
pub mod constants;
pub mod counter;
pub mod cpu_type;
pub mod display;
pub mod energy;
pub mod error;
pub mod monitor;
pub mod power;
pub mod sampler;
pub mod session;
pub mod ticker;
pub mod topology;
pub mod util;

use std::io;

pub use crate::config::HarnessConfig;
pub use crate::error::{HarnessError, Result};
pub use crate::monitor::Harness;

/// Runs the configured command under measurement on this machine's hardware
///
/// This is the main entry point: the command's stdout is relayed to our stdout
/// and power reports go to stderr. Returns the exit code to forward.
pub fn measure_command(config: HarnessConfig) -> Result<i32> {
	Harness::setup(config)?.run(io::stdout().lock(), io::stderr())
}
