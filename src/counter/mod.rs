pub mod msr;
pub mod perf;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{CounterKind, UnitSelection};
use crate::constants::PERF_POWER_PMU_DIR;
use crate::energy::{CounterSnapshot, DomainDelta, EnergyDomain};
use crate::error::{HarnessError, Result};
use crate::util::{average_watts, counter_delta};

/// Outcome of probing counters on a set of processing units
#[derive(Debug, Default)]
pub struct Probe {
	/// Every domain that was probed, available or not, in report order
	pub domains: Vec<EnergyDomain>,

	/// First counter that could not be opened for lack of privileges
	pub permission_denied: Option<String>,
}

/// Access to a family of cumulative hardware energy counters
pub trait CounterProvider: Debug + Send {
	/// Short name used in log messages
	fn name(&self) -> &'static str;

	/// Units to open when the user did not choose any
	fn default_units(&self) -> Vec<usize>;

	/// Opens every known domain on the given units
	fn open(&mut self, units: &[usize]) -> Result<Probe>;

	/// Reads the raw cumulative value of an open domain
	fn read(&mut self, domain: &EnergyDomain) -> Result<u64>;

	/// Releases every counter handle; must be idempotent
	fn close(&mut self);
}

/// Factory function to create the provider requested on the command line
pub fn create_provider(kind: CounterKind) -> Box<dyn CounterProvider> {
	match kind {
		CounterKind::Perf => Box::new(perf::PerfRaplProvider::new()),
		CounterKind::Msr => Box::new(msr::MsrRaplProvider::new()),
		CounterKind::Auto => {
			if Path::new(PERF_POWER_PMU_DIR).join("type").exists() {
				Box::new(perf::PerfRaplProvider::new())
			} else {
				info!("No perf power PMU found, falling back to RAPL MSRs");
				Box::new(msr::MsrRaplProvider::new())
			}
		},
	}
}

/// Open energy counters with a moving baseline
///
/// Every delta is measured against the previous read, so consecutive deltas
/// partition the time since the last baseline without overlap.
#[derive(Debug)]
pub struct CounterSource {
	provider: Box<dyn CounterProvider>,
	domains: Vec<EnergyDomain>,
	baseline: CounterSnapshot,
	closed: bool,
}

impl CounterSource {
	/// Probes the provider and keeps only the domains that could be opened
	pub fn open(mut provider: Box<dyn CounterProvider>, selection: UnitSelection) -> Result<Self> {
		let units = match selection {
			UnitSelection::Auto => {
				let units = provider.default_units();
				if units.is_empty() { vec![0] } else { units }
			},
			UnitSelection::Count(count) => (0..count).collect(),
		};
		debug!("Opening {} counters on units {:?}", provider.name(), units);

		let probe = match provider.open(&units) {
			Ok(probe) => probe,
			Err(e) => {
				provider.close();
				return Err(e);
			},
		};

		let mut unavailable: BTreeMap<&'static str, Vec<usize>> = BTreeMap::new();
		let mut domains = Vec::new();
		for domain in probe.domains {
			if domain.available {
				domains.push(domain);
			} else {
				unavailable.entry(domain.name).or_default().push(domain.unit);
			}
		}

		for (name, units) in &unavailable {
			info!("Energy domain {} is not available on units {:?}, skipping", name, units);
		}

		if let Some(what) = probe.permission_denied {
			if domains.is_empty() {
				provider.close();
				return Err(HarnessError::PermissionDenied { what });
			}
			warn!("Permission denied opening {}; some energy domains are excluded", what);
		}

		info!(
			"Measuring {} energy domains through {}: {}",
			domains.len(),
			provider.name(),
			domains.iter().map(EnergyDomain::label).collect::<Vec<_>>().join(", ")
		);

		let baseline = CounterSnapshot {
			values: vec![0; domains.len()],
		};

		Ok(Self {
			provider,
			domains,
			baseline,
			closed: false,
		})
	}

	/// Domains being measured, in report order
	pub fn domains(&self) -> &[EnergyDomain] {
		&self.domains
	}

	/// Reads the current cumulative value of every open domain
	pub fn snapshot(&mut self) -> Result<CounterSnapshot> {
		let mut values = Vec::with_capacity(self.domains.len());
		for domain in &self.domains {
			values.push(self.provider.read(domain)?);
		}
		Ok(CounterSnapshot { values })
	}

	/// Captures the current values as the reference for the next delta
	pub fn read_baseline(&mut self) -> Result<()> {
		self.baseline = self.snapshot()?;
		Ok(())
	}

	/// Energy and average power of every domain since the previous read
	pub fn read_delta(&mut self, elapsed: Duration) -> Result<Vec<DomainDelta>> {
		let current = self.snapshot()?;
		let seconds = elapsed.as_secs_f64();

		let deltas = self
			.domains
			.iter()
			.zip(self.baseline.values.iter().zip(&current.values))
			.map(|(domain, (&start, &end))| {
				let joules = counter_delta(start, end, domain.width) as f64 * domain.scale;
				DomainDelta {
					joules,
					watts: average_watts(joules, seconds),
				}
			})
			.collect();

		self.baseline = current;
		Ok(deltas)
	}

	/// Releases the counters; safe to call more than once
	pub fn close(&mut self) {
		if !self.closed {
			self.provider.close();
			self.closed = true;
		}
	}
}

impl Drop for CounterSource {
	fn drop(&mut self) {
		self.close();
	}
}
