use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info};

use crate::accelerator::nvml::NvmlSource;
use crate::accelerator::{AcceleratorSource, NoAccelerators};
use crate::child::{ChildProcess, Marker, MarkerScanner, exit_code};
use crate::config::HarnessConfig;
use crate::counter::{CounterSource, create_provider};
use crate::display::{Columns, Reporter};
use crate::error::{HarnessError, Result};
use crate::sampler::AcceleratorSampler;
use crate::session::{SamplingSession, WindowDriver};

/// Energy sources plus the command to measure, ready to run
#[derive(Debug)]
pub struct Harness {
	config: HarnessConfig,
	counters: CounterSource,
	accelerators: Box<dyn AcceleratorSource>,
}

impl Harness {
	/// Opens the hardware sources selected by `config`
	///
	/// Fails before anything is spawned if the counters or the accelerator
	/// telemetry cannot be initialized.
	pub fn setup(config: HarnessConfig) -> Result<Self> {
		let counters = CounterSource::open(create_provider(config.counters), config.units)?;

		let accelerators: Box<dyn AcceleratorSource> = if config.accelerators {
			Box::new(NvmlSource::init()?)
		} else {
			info!("Accelerator telemetry disabled");
			Box::new(NoAccelerators)
		};

		Self::with_sources(config, counters, accelerators)
	}

	/// Builds a harness over already opened sources
	pub fn with_sources(
		config: HarnessConfig,
		counters: CounterSource,
		accelerators: Box<dyn AcceleratorSource>,
	) -> Result<Self> {
		if counters.domains().is_empty() && accelerators.units().is_empty() {
			return Err(HarnessError::NoSources);
		}
		Ok(Self {
			config,
			counters,
			accelerators,
		})
	}

	/// Runs the command to completion
	///
	/// The child's stdout is copied to `relay`, reports are written to `reports`.
	/// Returns the exit code to forward: the child's own, or 128 + signal.
	pub fn run<O, R>(self, mut relay: O, reports: R) -> Result<i32>
	where
		O: Write,
		R: Write + Send + 'static,
	{
		let Harness {
			config,
			counters,
			accelerators,
		} = self;

		let sampler = AcceleratorSampler::spawn(accelerators, config.poll_interval)?;
		let reporter = Reporter::spawn(Columns::new(counters.domains(), sampler.units()), reports)?;
		let session = SamplingSession::new(counters, sampler.accumulator(), reporter.sender());

		let mut child = ChildProcess::spawn(&config.command)?;
		let killer = child.killer();

		let fatal: Arc<Mutex<Option<HarnessError>>> = Arc::default();
		let fatal_slot = fatal.clone();
		let mut driver = WindowDriver::new(session, config.tick_interval, move |e| {
			error!("Measurement failed, stopping the command: {}", e);
			fatal_slot
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.get_or_insert(e);
			killer.kill();
		});

		let scanner = MarkerScanner::new(&config.roi_start, &config.roi_end);
		let relayed = relay_output(&mut child, &mut driver, &scanner, config.roi, &mut relay);
		if relayed.is_err() {
			killer.kill();
		}

		// The child closed its output: close any open window before reaping it
		let closed = driver.close();
		drop(driver);

		let status = child.wait();
		drop(sampler);
		let reported = reporter.finish();

		if let Some(e) = fatal.lock().unwrap_or_else(PoisonError::into_inner).take() {
			return Err(e);
		}
		relayed?;
		closed?;
		reported?;

		let status = status?;
		info!("Command finished with {}", status);
		Ok(exit_code(status))
	}
}

/// Copies the child's output line by line, opening and closing windows on the way
fn relay_output<O: Write>(
	child: &mut ChildProcess,
	driver: &mut WindowDriver,
	scanner: &MarkerScanner,
	roi: bool,
	out: &mut O,
) -> Result<()> {
	if !roi {
		driver.open()?;
	}

	for line in child.lines() {
		let line = line?;
		if roi {
			match scanner.scan(&line) {
				Some(Marker::Start) => driver.open()?,
				Some(Marker::End) => driver.close()?,
				None => {},
			}
		}
		out.write_all(&line)?;
		out.flush()?;
	}

	Ok(())
}
