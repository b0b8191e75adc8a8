use std::fmt;

use log::{info, warn};
use nvml_wrapper::Nvml;

use crate::accelerator::{AcceleratorSource, AcceleratorUnit};
use crate::error::{HarnessError, Result};

/// NVIDIA GPUs read through NVML
pub struct NvmlSource {
	nvml: Nvml,
	units: Vec<AcceleratorUnit>,
}

impl NvmlSource {
	/// Initializes NVML and enumerates every visible device
	///
	/// Devices that cannot report their handle or power draw are skipped.
	pub fn init() -> Result<Self> {
		let nvml = Nvml::init()?;
		let count = nvml.device_count()?;

		let mut units = Vec::new();
		for handle in 0..count {
			let device = match nvml.device_by_index(handle) {
				Ok(device) => device,
				Err(e) => {
					warn!("Skipping NVIDIA device {}: {}", handle, e);
					continue;
				},
			};
			if let Err(e) = device.power_usage() {
				info!("NVIDIA device {} does not report power usage ({}), skipping", handle, e);
				continue;
			}
			let name = device.name().unwrap_or_else(|_| format!("NVIDIA device {handle}"));
			info!("Found accelerator {}: {}", units.len(), name);
			units.push(AcceleratorUnit {
				index: units.len(),
				handle,
				name,
			});
		}

		Ok(Self { nvml, units })
	}
}

impl fmt::Debug for NvmlSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NvmlSource").field("units", &self.units).finish()
	}
}

impl AcceleratorSource for NvmlSource {
	fn units(&self) -> &[AcceleratorUnit] {
		&self.units
	}

	fn power_watts(&mut self, unit: &AcceleratorUnit) -> Result<f64> {
		let read_error = |e: nvml_wrapper::error::NvmlError| HarnessError::AcceleratorRead {
			unit: unit.label(),
			reason: e.to_string(),
		};
		let device = self.nvml.device_by_index(unit.handle).map_err(read_error)?;
		let milliwatts = device.power_usage().map_err(read_error)?;
		Ok(f64::from(milliwatts) / 1000.0)
	}
}
