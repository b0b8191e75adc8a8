use std::ffi::OsString;
use std::time::Duration;

use clap::ValueEnum;

use crate::constants::{ACCELERATOR_POLL_INTERVAL_US, DEFAULT_TICK_INTERVAL_MS, ROI_END_MARKER, ROI_START_MARKER};

/// Which kernel facility backs the CPU energy counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CounterKind {
	/// perf power PMU when present, MSRs otherwise
	Auto,
	/// Linux perf_event `power` PMU
	Perf,
	/// RAPL model-specific registers
	Msr,
}

/// Processing units to open counters on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSelection {
	/// One unit per package, as reported by the provider
	Auto,
	/// Units `0..n`
	Count(usize),
}

/// Runtime settings of one harness run
#[derive(Debug, Clone)]
pub struct HarnessConfig {
	pub roi: bool,
	pub tick_interval: Duration,
	pub poll_interval: Duration,
	pub units: UnitSelection,
	pub counters: CounterKind,
	pub accelerators: bool,
	pub roi_start: String,
	pub roi_end: String,
	pub command: Vec<OsString>,
}

impl HarnessConfig {
	pub fn new(command: Vec<OsString>) -> Self {
		Self {
			roi: false,
			tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
			poll_interval: Duration::from_micros(ACCELERATOR_POLL_INTERVAL_US),
			units: UnitSelection::Auto,
			counters: CounterKind::Auto,
			accelerators: true,
			roi_start: ROI_START_MARKER.to_string(),
			roi_end: ROI_END_MARKER.to_string(),
			command,
		}
	}
}
