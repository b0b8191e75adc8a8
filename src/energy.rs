/// One RAPL counter channel on a specific processing unit
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyDomain {
	/// Processing unit (logical CPU) the counter is opened on
	pub unit: usize,

	/// Domain name, one of `constants::RAPL_DOMAINS`
	pub name: &'static str,

	/// Joules per raw counter increment
	pub scale: f64,

	/// Number of significant bits before the counter wraps
	pub width: u32,

	/// Whether the counter could be opened on this machine
	pub available: bool,

	/// Provider-private handle index
	pub slot: usize,
}

impl EnergyDomain {
	/// Column label used in reports
	pub fn label(&self) -> String {
		format!("cpu{}/{}", self.unit, self.name)
	}
}

/// Raw cumulative counter values, one per open domain, in domain order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterSnapshot {
	pub values: Vec<u64>,
}

/// Energy consumed by a domain between two reads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainDelta {
	pub joules: f64,
	pub watts: f64,
}
