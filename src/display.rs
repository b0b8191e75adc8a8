use std::io::{self, Write};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use log::debug;

use crate::accelerator::AcceleratorUnit;
use crate::energy::EnergyDomain;
use crate::error::Result;
use crate::power::{Report, Sample, WindowTotal};

/// Names of the report columns, energy domains first, then accelerators
#[derive(Debug, Clone, PartialEq)]
pub struct Columns {
	names: Vec<String>,
}

impl Columns {
	pub fn new(domains: &[EnergyDomain], accelerators: &[AcceleratorUnit]) -> Self {
		let names = domains
			.iter()
			.map(EnergyDomain::label)
			.chain(accelerators.iter().map(AcceleratorUnit::label))
			.collect();
		Self { names }
	}

	pub fn names(&self) -> &[String] {
		&self.names
	}

	/// Header line: time since window start, interval, then one column per source
	pub fn header(&self) -> String {
		let mut line = format!("{:>10} {:>10}", "time", "dt");
		for name in &self.names {
			line.push_str(&format!(" {:>12}", name));
		}
		line
	}
}

/// One line of average watts per column
pub fn format_sample(sample: &Sample) -> String {
	let mut line = format!("{:>10.3} {:>10.3}", sample.at.as_secs_f64(), sample.elapsed.as_secs_f64());
	for watts in &sample.power {
		line.push_str(&format!(" {:>12.3}", watts));
	}
	line
}

/// One line of joules per column consumed during the window
pub fn format_total(total: &WindowTotal) -> String {
	let mut line = format!("{:>10} {:>10.3}", "total", total.duration.as_secs_f64());
	for joules in &total.energy {
		line.push_str(&format!(" {:>12.3}", joules));
	}
	line
}

/// Writes reports on a dedicated thread so sampling never waits on the sink
///
/// Reports are written in the order they were sent. The header goes out right
/// before the first report; a run without reports writes nothing.
pub struct Reporter {
	tx: Sender<Report>,
	handle: JoinHandle<io::Result<()>>,
}

impl Reporter {
	pub fn spawn<W>(columns: Columns, mut out: W) -> Result<Self>
	where
		W: Write + Send + 'static,
	{
		let (tx, rx) = mpsc::channel::<Report>();

		let handle = thread::Builder::new().name("reporter".into()).spawn(move || {
			let mut header_written = false;
			for report in rx {
				if !header_written {
					writeln!(out, "{}", columns.header())?;
					header_written = true;
				}
				match &report {
					Report::Sample(sample) => writeln!(out, "{}", format_sample(sample))?,
					Report::Total(total) => writeln!(out, "{}", format_total(total))?,
				}
				out.flush()?;
			}
			debug!("Reporter drained");
			Ok(())
		})?;

		Ok(Self { tx, handle })
	}

	/// Sending half for the sampling session
	pub fn sender(&self) -> Sender<Report> {
		self.tx.clone()
	}

	/// Waits until every report sent so far has been written
	///
	/// All senders handed out by [`Reporter::sender`] must be dropped first.
	pub fn finish(self) -> Result<()> {
		drop(self.tx);
		match self.handle.join() {
			Ok(result) => Ok(result?),
			Err(_) => Err(io::Error::new(io::ErrorKind::Other, "reporter thread panicked").into()),
		}
	}
}
