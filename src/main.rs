use std::io::{Error, Write};
use std::process;

use clap::Parser;
use energy_harness::cli::Cli;
use energy_harness::measure_command;
use flexi_logger::{DeferredNow, Logger, LoggerHandle, Record, WriteMode};

fn custom_format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> Result<(), Error> {
	write!(
		w,
		"[{}] {:5} {}",
		now.format("%d-%m-%Y %H:%M:%S%.3f"),
		record.level(),
		record.args()
	)
}

fn configure_logger() -> Result<LoggerHandle, Box<dyn std::error::Error>> {
	let handle = Logger::try_with_env_or_str("warn")?
		.log_to_stderr()
		.write_mode(WriteMode::Direct)
		.format(custom_format)
		.start()?;
	Ok(handle)
}

fn main() {
	let cli = Cli::parse();

	let _logger = match configure_logger() {
		Ok(handle) => handle,
		Err(err) => {
			eprintln!("Failed to configure logger: {}", err);
			process::exit(1);
		},
	};

	let code = match cli.into_config().and_then(measure_command) {
		Ok(code) => code,
		Err(err) => {
			eprintln!("harness: {}", err);
			err.exit_code()
		},
	};

	process::exit(code);
}
