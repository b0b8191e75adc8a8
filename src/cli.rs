use std::ffi::OsString;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{CounterKind, HarnessConfig, UnitSelection};
use crate::constants::{DEFAULT_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS, ROI_END_MARKER, ROI_START_MARKER};
use crate::error::{HarnessError, Result};

/// Runs <COMMAND> and reports the CPU and accelerator power it draws while running.
///
/// Reports go to stderr; the command's stdout is relayed unchanged to stdout.
#[derive(Parser, Debug)]
#[command(name = "harness", version, about, disable_version_flag = true)]
pub struct Cli {
	/// Only measure inside the region of interest delimited by the ROI markers
	#[arg(short = 'r', long)]
	pub roi: bool,

	/// Milliseconds between power reports (1-999)
	#[arg(short = 'i', long = "interval", value_name = "MS", default_value_t = DEFAULT_TICK_INTERVAL_MS, value_parser = parse_interval)]
	pub interval_ms: u64,

	/// Number of processing units to read energy counters on [default: one per package]
	#[arg(short = 'c', long = "units", value_name = "UNITS", value_parser = clap::value_parser!(u64).range(1..))]
	pub units: Option<u64>,

	/// Energy counter interface
	#[arg(long, value_enum, default_value_t = CounterKind::Auto)]
	pub counters: CounterKind,

	/// Do not initialize accelerator telemetry
	#[arg(long)]
	pub no_accelerators: bool,

	/// Output substring that opens the region of interest
	#[arg(long, value_name = "TEXT", default_value = ROI_START_MARKER, allow_hyphen_values = true)]
	pub roi_start: String,

	/// Output substring that closes the region of interest
	#[arg(long, value_name = "TEXT", default_value = ROI_END_MARKER, allow_hyphen_values = true)]
	pub roi_end: String,

	/// Print version
	#[arg(short = 'v', long = "version", action = ArgAction::Version)]
	#[allow(dead_code)]
	version: Option<bool>,

	/// Command to run, followed by its arguments
	#[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
	pub command: Vec<OsString>,
}

/// Accepts a whole number of milliseconds strictly between 0 and 1000
pub fn parse_interval(value: &str) -> std::result::Result<u64, String> {
	let ms: u64 = value
		.trim()
		.parse()
		.map_err(|_| format!("invalid interval `{value}`, expecting a number of milliseconds"))?;
	if ms == 0 {
		return Err("interval must be at least 1 ms".to_string());
	}
	if ms >= MAX_TICK_INTERVAL_MS {
		return Err(format!("interval {ms} too long, should be less than {MAX_TICK_INTERVAL_MS}"));
	}
	Ok(ms)
}

impl Cli {
	/// Validates the options against this machine and builds the run configuration
	pub fn into_config(self) -> Result<HarnessConfig> {
		let units = match self.units {
			None => UnitSelection::Auto,
			Some(count) => {
				let online = num_cpus::get();
				let count = usize::try_from(count).unwrap_or(usize::MAX);
				if count > online {
					return Err(HarnessError::Usage(format!(
						"unit count {count} exceeds the {online} online processors"
					)));
				}
				UnitSelection::Count(count)
			},
		};

		let mut config = HarnessConfig::new(self.command);
		config.roi = self.roi;
		config.tick_interval = Duration::from_millis(self.interval_ms);
		config.units = units;
		config.counters = self.counters;
		config.accelerators = !self.no_accelerators;
		config.roi_start = self.roi_start;
		config.roi_end = self.roi_end;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use clap::error::ErrorKind;

	use super::*;

	fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
		Cli::try_parse_from(std::iter::once("harness").chain(args.iter().copied()))
	}

	#[test]
	fn defaults() {
		let config = parse(&["sleep", "1"]).unwrap().into_config().unwrap();
		assert!(!config.roi);
		assert_eq!(config.tick_interval, Duration::from_millis(500));
		assert_eq!(config.units, UnitSelection::Auto);
		assert_eq!(config.counters, CounterKind::Auto);
		assert!(config.accelerators);
		assert_eq!(config.command, vec![OsString::from("sleep"), OsString::from("1")]);
	}

	#[test]
	fn interval_bounds() {
		for ok in ["1", "250", "999"] {
			let cli = parse(&["-i", ok, "true"]).unwrap();
			assert_eq!(cli.interval_ms.to_string(), ok);
		}
		for bad in ["0", "1000", "5000", "fast", "1.5"] {
			let err = parse(&["-i", bad, "true"]).unwrap_err();
			assert_eq!(err.kind(), ErrorKind::ValueValidation, "{bad}");
		}
		assert!(parse(&["-i", "-3", "true"]).is_err());
	}

	#[test]
	fn command_is_required() {
		let err = parse(&["-r"]).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
	}

	#[test]
	fn command_arguments_are_not_options() {
		let cli = parse(&["-r", "ls", "-l", "-i", "3"]).unwrap();
		assert!(cli.roi);
		assert_eq!(cli.interval_ms, 500);
		let command: Vec<OsString> = ["ls", "-l", "-i", "3"].iter().map(OsString::from).collect();
		assert_eq!(cli.command, command);
	}

	#[test]
	fn version_and_help() {
		assert_eq!(parse(&["-v"]).unwrap_err().kind(), ErrorKind::DisplayVersion);
		assert_eq!(parse(&["-h"]).unwrap_err().kind(), ErrorKind::DisplayHelp);
	}

	#[test]
	fn unit_count_limited_to_online_cpus() {
		let config = parse(&["-c", "1", "true"]).unwrap().into_config().unwrap();
		assert_eq!(config.units, UnitSelection::Count(1));

		let too_many = (num_cpus::get() + 1).to_string();
		let err = parse(&["-c", &too_many, "true"]).unwrap().into_config().unwrap_err();
		assert!(matches!(err, HarnessError::Usage(_)));

		assert!(parse(&["-c", "0", "true"]).is_err());
	}
}
