pub mod nvml;

use std::fmt::Debug;

use crate::error::Result;

/// One attached accelerator device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorUnit {
	/// Position in report order
	pub index: usize,

	/// Provider-specific device handle
	pub handle: u32,

	/// Human-readable device name
	pub name: String,
}

impl AcceleratorUnit {
	/// Column label used in reports
	pub fn label(&self) -> String {
		format!("gpu{}", self.index)
	}
}

/// Instantaneous power readings for a fixed set of accelerators
pub trait AcceleratorSource: Debug + Send {
	/// Devices exposed by this source, in index order
	fn units(&self) -> &[AcceleratorUnit];

	/// Current power draw of `unit` in watts
	fn power_watts(&mut self, unit: &AcceleratorUnit) -> Result<f64>;
}

/// A source with no devices, used when accelerator telemetry is disabled
#[derive(Debug, Default)]
pub struct NoAccelerators;

impl AcceleratorSource for NoAccelerators {
	fn units(&self) -> &[AcceleratorUnit] {
		&[]
	}

	fn power_watts(&mut self, _unit: &AcceleratorUnit) -> Result<f64> {
		Ok(0.0)
	}
}
