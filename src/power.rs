use std::time::Duration;

/// Average power over one tick of an active window
///
/// `power` holds watts in column order: energy domains first, then accelerators.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
	/// Time since the window opened
	pub at: Duration,

	/// Interval since the previous tick (or the window start)
	pub elapsed: Duration,

	pub power: Vec<f64>,
}

impl Sample {
	/// Energy represented by this sample, per column
	pub fn energy(&self) -> impl Iterator<Item = f64> + '_ {
		let secs = self.elapsed.as_secs_f64();
		self.power.iter().map(move |watts| watts * secs)
	}
}

/// Energy consumed across a closed window, in joules per column
#[derive(Debug, Clone, PartialEq)]
pub struct WindowTotal {
	pub duration: Duration,
	pub energy: Vec<f64>,
}

/// Events flowing from the sampling session to the reporter
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
	Sample(Sample),
	Total(WindowTotal),
}
