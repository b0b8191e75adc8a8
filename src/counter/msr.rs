use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::constants::*;
use crate::counter::{CounterProvider, Probe};
use crate::cpu_type::{CpuType, detect_cpu_type};
use crate::energy::EnergyDomain;
use crate::error::{HarnessError, Result};
use crate::topology::package_leaders;
use crate::util::msr::{energy_scale, read_msr};

/// Energy status registers per RAPL domain for each vendor
fn domain_register(cpu_type: CpuType, domain: &str) -> Option<u32> {
	match (cpu_type, domain) {
		(CpuType::Intel, "cores") => Some(INTEL_PP0_ENERGY_MSR),
		(CpuType::Intel, "gpu") => Some(INTEL_PP1_ENERGY_MSR),
		(CpuType::Intel, "pkg") => Some(INTEL_PKG_ENERGY_MSR),
		(CpuType::Intel, "ram") => Some(INTEL_DRAM_ENERGY_MSR),
		(CpuType::Intel, "psys") => Some(INTEL_PLATFORM_ENERGY_MSR),
		(CpuType::Amd, "cores") => Some(AMD_ENERGY_CORE_MSR),
		(CpuType::Amd, "pkg") => Some(AMD_ENERGY_PKG_MSR),
		_ => None,
	}
}

fn unit_register(cpu_type: CpuType) -> Option<u32> {
	match cpu_type {
		CpuType::Intel => Some(INTEL_POWER_UNIT_MSR),
		CpuType::Amd => Some(AMD_ENERGY_UNIT_MSR),
		CpuType::Unsupported => None,
	}
}

/// RAPL counters read straight from the model-specific registers
///
/// Needs the `msr` kernel module and read access to `/dev/cpu/N/msr`.
#[derive(Debug)]
pub struct MsrRaplProvider {
	cpu_type: CpuType,
	cpu_dir: PathBuf,
	dev_dir: PathBuf,
	registers: Vec<(usize, u32)>,
}

impl MsrRaplProvider {
	pub fn new() -> Self {
		Self {
			cpu_type: detect_cpu_type(),
			cpu_dir: PathBuf::from(SYSFS_CPU_DIR),
			dev_dir: PathBuf::from("/dev/cpu"),
			registers: Vec::new(),
		}
	}

	/// Checks that the MSR device of `unit` can be opened before asking msru for it
	fn device_access(&self, unit: usize) -> io::Result<()> {
		File::open(msr_path(&self.dev_dir, unit)).map(drop)
	}

	fn probe_unit(&mut self, unit: usize, probe: &mut Probe) {
		let unavailable = |name: &'static str| EnergyDomain {
			unit,
			name,
			scale: 0.0,
			width: MSR_COUNTER_BITS,
			available: false,
			slot: 0,
		};

		let scale = match self.device_access(unit) {
			Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
				probe
					.permission_denied
					.get_or_insert_with(|| msr_path(&self.dev_dir, unit).display().to_string());
				None
			},
			Err(e) => {
				debug!("MSR device for cpu {} unavailable: {}", unit, e);
				None
			},
			Ok(()) => unit_register(self.cpu_type)
				.and_then(|reg| read_msr(reg, unit).ok())
				.map(energy_scale),
		};

		for &name in RAPL_DOMAINS.iter() {
			let register = domain_register(self.cpu_type, name);
			match (scale, register) {
				(Some(scale), Some(register)) if read_msr(register, unit).is_ok() => {
					debug!("Using MSR {:#x} for {} on cpu {}", register, name, unit);
					probe.domains.push(EnergyDomain {
						scale,
						available: true,
						slot: self.registers.len(),
						..unavailable(name)
					});
					self.registers.push((unit, register));
				},
				_ => probe.domains.push(unavailable(name)),
			}
		}
	}
}

impl Default for MsrRaplProvider {
	fn default() -> Self {
		Self::new()
	}
}

fn msr_path(dev_dir: &Path, unit: usize) -> PathBuf {
	dev_dir.join(unit.to_string()).join("msr")
}

impl CounterProvider for MsrRaplProvider {
	fn name(&self) -> &'static str {
		"msr"
	}

	fn default_units(&self) -> Vec<usize> {
		package_leaders(&self.cpu_dir)
	}

	fn open(&mut self, units: &[usize]) -> Result<Probe> {
		let mut probe = Probe::default();
		if self.cpu_type == CpuType::Unsupported {
			debug!("No RAPL MSR layout known for this CPU");
		}
		for &unit in units {
			self.probe_unit(unit, &mut probe);
		}
		Ok(probe)
	}

	fn read(&mut self, domain: &EnergyDomain) -> Result<u64> {
		let &(cpu, register) = self.registers.get(domain.slot).ok_or_else(|| HarnessError::CounterRead {
			domain: domain.label(),
			source: io::Error::from(io::ErrorKind::NotConnected),
		})?;
		let raw = read_msr(register, cpu).map_err(|source| HarnessError::CounterRead {
			domain: domain.label(),
			source,
		})?;
		Ok(raw & ((1u64 << MSR_COUNTER_BITS) - 1))
	}

	fn close(&mut self) {
		self.registers.clear();
	}
}
