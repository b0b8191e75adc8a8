//! RAPL energy counters exposed by the Linux `power` perf PMU.
//!
//! Available events are listed under `/sys/bus/event_source/devices/power/events/`.
//! Opening them system-wide requires root or `perf_event_paranoid` below 1.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use log::{debug, warn};
use perf_event::events::Dynamic;
use perf_event::{Builder, Counter};

use crate::constants::{PERF_COUNTER_BITS, PERF_POWER_PMU_DIR, RAPL_DOMAINS};
use crate::counter::{CounterProvider, Probe};
use crate::energy::EnergyDomain;
use crate::error::{HarnessError, Result};
use crate::topology::parse_cpu_list;

/// Event description of a domain the PMU exports
struct RaplEvent {
	event: Dynamic,
	scale: f64,
}

pub struct PerfRaplProvider {
	pmu_dir: PathBuf,
	counters: Vec<Counter>,
}

impl PerfRaplProvider {
	pub fn new() -> Self {
		Self::with_pmu_dir(PERF_POWER_PMU_DIR)
	}

	pub fn with_pmu_dir(pmu_dir: impl Into<PathBuf>) -> Self {
		Self {
			pmu_dir: pmu_dir.into(),
			counters: Vec::new(),
		}
	}

	/// Resolves `energy-<domain>` and its joules-per-count scale
	fn event(&self, domain: &str) -> Option<RaplEvent> {
		let mut builder = Dynamic::builder(&self.pmu_dir).ok()?;
		if let Err(e) = builder.event(format!("energy-{domain}")) {
			debug!("PMU does not export energy-{}: {}", domain, e);
			return None;
		}
		let scale = match builder.scale() {
			Ok(Some(scale)) => scale,
			_ => {
				debug!("energy-{} has no scale, skipping", domain);
				return None;
			},
		};
		let event = builder.build().ok()?;
		Some(RaplEvent { event, scale })
	}
}

impl Default for PerfRaplProvider {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for PerfRaplProvider {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PerfRaplProvider")
			.field("pmu_dir", &self.pmu_dir)
			.field("counters", &self.counters.len())
			.finish()
	}
}

fn open_counter(event: &Dynamic, cpu: usize) -> io::Result<Counter> {
	let mut counter = Builder::new(event.clone())
		.one_cpu(cpu)
		.any_pid()
		.exclude_hv(false)
		.exclude_kernel(false)
		.build()?;
	counter.enable()?;
	Ok(counter)
}

impl CounterProvider for PerfRaplProvider {
	fn name(&self) -> &'static str {
		"perf"
	}

	fn default_units(&self) -> Vec<usize> {
		fs::read_to_string(self.pmu_dir.join("cpumask"))
			.map(|mask| parse_cpu_list(&mask))
			.unwrap_or_default()
	}

	fn open(&mut self, units: &[usize]) -> Result<Probe> {
		let mut probe = Probe::default();

		if !self.pmu_dir.join("type").exists() {
			warn!("No perf_event RAPL support found at {} (requires Linux 3.14)", self.pmu_dir.display());
			return Ok(probe);
		}

		let events: Vec<_> = RAPL_DOMAINS.iter().map(|&name| (name, self.event(name))).collect();

		for &unit in units {
			for (name, event) in &events {
				let name = *name;
				let mut domain = EnergyDomain {
					unit,
					name,
					scale: 0.0,
					width: PERF_COUNTER_BITS,
					available: false,
					slot: 0,
				};

				if let Some(rapl) = event {
					domain.scale = rapl.scale;
					match open_counter(&rapl.event, unit) {
						Ok(counter) => {
							debug!("Opened perf event energy-{} on cpu {}", name, unit);
							domain.available = true;
							domain.slot = self.counters.len();
							self.counters.push(counter);
						},
						Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
							probe
								.permission_denied
								.get_or_insert_with(|| format!("perf event energy-{name} on cpu {unit}"));
						},
						Err(e) => debug!("Cannot open energy-{} on cpu {}: {}", name, unit, e),
					}
				}

				probe.domains.push(domain);
			}
		}

		Ok(probe)
	}

	fn read(&mut self, domain: &EnergyDomain) -> Result<u64> {
		let counter = self.counters.get_mut(domain.slot).ok_or_else(|| HarnessError::CounterRead {
			domain: domain.label(),
			source: io::Error::from(io::ErrorKind::NotConnected),
		})?;
		counter.read().map_err(|source| HarnessError::CounterRead {
			domain: domain.label(),
			source,
		})
	}

	fn close(&mut self) {
		self.counters.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fake_pmu(dir: &std::path::Path) {
		fs::create_dir_all(dir.join("events")).unwrap();
		fs::write(dir.join("type"), "23\n").unwrap();
		fs::write(dir.join("cpumask"), "0,18\n").unwrap();
	}

	#[test]
	fn default_units_follow_cpumask() {
		let dir = tempfile::tempdir().unwrap();
		fake_pmu(dir.path());
		assert_eq!(PerfRaplProvider::with_pmu_dir(dir.path()).default_units(), vec![0, 18]);

		let missing = PerfRaplProvider::with_pmu_dir(dir.path().join("nothing"));
		assert!(missing.default_units().is_empty());
	}

	#[test]
	fn missing_pmu_opens_nothing() {
		let dir = tempfile::tempdir().unwrap();
		let mut provider = PerfRaplProvider::with_pmu_dir(dir.path().join("power"));
		let probe = provider.open(&[0]).unwrap();
		assert!(probe.domains.is_empty());
		assert!(probe.permission_denied.is_none());
	}

	#[test]
	fn domains_without_events_are_unavailable() {
		let dir = tempfile::tempdir().unwrap();
		fake_pmu(dir.path());

		let mut provider = PerfRaplProvider::with_pmu_dir(dir.path());
		let probe = provider.open(&[0, 1]).unwrap();
		assert_eq!(probe.domains.len(), 2 * RAPL_DOMAINS.len());
		assert!(probe.domains.iter().all(|d| !d.available));
		assert!(probe.permission_denied.is_none());
		assert_eq!(probe.domains[0].unit, 0);
		assert_eq!(probe.domains[RAPL_DOMAINS.len()].unit, 1);
		assert_eq!(probe.domains[0].width, PERF_COUNTER_BITS);
	}

	#[test]
	fn unopened_domain_cannot_be_read() {
		let mut provider = PerfRaplProvider::with_pmu_dir("/nonexistent");
		let domain = EnergyDomain {
			unit: 0,
			name: "pkg",
			scale: 1.0,
			width: PERF_COUNTER_BITS,
			available: true,
			slot: 3,
		};
		assert!(matches!(provider.read(&domain), Err(HarnessError::CounterRead { .. })));
	}
}
