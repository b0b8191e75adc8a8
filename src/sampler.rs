use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::accelerator::{AcceleratorSource, AcceleratorUnit};
use crate::error::{HarnessError, Result};

#[derive(Debug, Default)]
struct Accumulated {
	joules: Vec<f64>,
	/// Label of the unit whose read failed, and why
	failure: Option<(String, String)>,
}

/// Joules integrated per accelerator since the sampler started
///
/// Cheap to clone; every clone refers to the same accumulator. The lock is only
/// held while copying or adding, never across a hardware read or a sleep.
#[derive(Debug, Clone, Default)]
pub struct EnergyAccumulator {
	inner: Arc<Mutex<Accumulated>>,
}

impl EnergyAccumulator {
	pub fn new(units: usize) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Accumulated {
				joules: vec![0.0; units],
				failure: None,
			})),
		}
	}

	fn lock(&self) -> MutexGuard<'_, Accumulated> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Adds one integration step, one entry per unit
	pub fn add(&self, joules: &[f64]) {
		let mut acc = self.lock();
		for (total, step) in acc.joules.iter_mut().zip(joules) {
			*total += step;
		}
	}

	/// Records a failed read of `unit`; every later snapshot reports it
	pub fn fail(&self, unit: String, reason: String) {
		self.lock().failure.get_or_insert((unit, reason));
	}

	/// Consistent copy of the accumulated energy
	pub fn snapshot(&self) -> Result<Vec<f64>> {
		let acc = self.lock();
		match &acc.failure {
			Some((unit, reason)) => Err(HarnessError::AcceleratorRead {
				unit: unit.clone(),
				reason: reason.clone(),
			}),
			None => Ok(acc.joules.clone()),
		}
	}
}

/// Background poller integrating accelerator power into an [`EnergyAccumulator`]
///
/// The poller runs for the lifetime of the value, whether or not a measurement
/// window is open, and is stopped and joined on drop.
pub struct AcceleratorSampler {
	accumulator: EnergyAccumulator,
	units: Vec<AcceleratorUnit>,
	stop: Option<mpsc::Sender<()>>,
	handle: Option<JoinHandle<()>>,
}

impl AcceleratorSampler {
	/// Starts polling `source` every `period`
	///
	/// Returns once the poller has taken its time baseline, so the accumulator
	/// is ready to be snapshotted. No thread is started for a source without units.
	pub fn spawn(mut source: Box<dyn AcceleratorSource>, period: Duration) -> Result<Self> {
		let units = source.units().to_vec();
		let accumulator = EnergyAccumulator::new(units.len());

		if units.is_empty() {
			return Ok(Self {
				accumulator,
				units,
				stop: None,
				handle: None,
			});
		}

		let (stop_tx, stop_rx) = mpsc::channel::<()>();
		let ready = Arc::new(Barrier::new(2));

		let shared = accumulator.clone();
		let thread_units = units.clone();
		let thread_ready = ready.clone();
		let handle = thread::Builder::new().name("accelerator-sampler".into()).spawn(move || {
			// First iteration only establishes the time baseline
			let mut last = Instant::now();
			thread_ready.wait();

			let mut step = vec![0.0; thread_units.len()];
			let mut watts = vec![0.0; thread_units.len()];
			loop {
				match stop_rx.recv_timeout(period) {
					Err(RecvTimeoutError::Timeout) => {},
					Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
				}

				let now = Instant::now();
				for (unit, power) in thread_units.iter().zip(watts.iter_mut()) {
					match source.power_watts(unit) {
						Ok(w) => *power = w,
						Err(e) => {
							error!("Accelerator sampling stopped: {}", e);
							let reason = match e {
								HarnessError::AcceleratorRead { reason, .. } => reason,
								other => other.to_string(),
							};
							shared.fail(unit.label(), reason);
							return;
						},
					}
				}

				let dt = now.duration_since(last).as_secs_f64();
				for (joules, power) in step.iter_mut().zip(&watts) {
					*joules = power * dt;
				}
				shared.add(&step);
				last = now;
			}
			debug!("Accelerator sampler stopped");
		})?;

		ready.wait();

		Ok(Self {
			accumulator,
			units,
			stop: Some(stop_tx),
			handle: Some(handle),
		})
	}

	pub fn units(&self) -> &[AcceleratorUnit] {
		&self.units
	}

	/// Handle to the shared accumulator, for the sampling session
	pub fn accumulator(&self) -> EnergyAccumulator {
		self.accumulator.clone()
	}

	/// Current accumulated joules per unit
	pub fn snapshot(&self) -> Result<Vec<f64>> {
		self.accumulator.snapshot()
	}
}

impl Drop for AcceleratorSampler {
	fn drop(&mut self) {
		self.stop.take();
		if let Some(handle) = self.handle.take() {
			let _ = handle.join();
		}
	}
}


#[cfg(test)]
mod tests {
	use super::testing::ConstantPower;
	use super::*;
	use crate::accelerator::NoAccelerators;

	#[test]
	fn accumulator_adds_per_unit() {
		let acc = EnergyAccumulator::new(2);
		acc.add(&[1.0, 2.0]);
		acc.add(&[0.5, 0.5]);
		assert_eq!(acc.snapshot().unwrap(), vec![1.5, 2.5]);
	}

	#[test]
	fn failure_poisons_snapshots() {
		let acc = EnergyAccumulator::new(1);
		acc.fail("gpu0".to_string(), "gone".to_string());
		acc.fail("gpu1".to_string(), "ignored".to_string());
		match acc.snapshot() {
			Err(HarnessError::AcceleratorRead { unit, reason }) => {
				assert_eq!(unit, "gpu0");
				assert_eq!(reason, "gone");
			},
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn no_units_no_thread() {
		let sampler = AcceleratorSampler::spawn(Box::new(NoAccelerators), Duration::from_millis(5)).unwrap();
		assert!(sampler.handle.is_none());
		assert!(sampler.snapshot().unwrap().is_empty());
	}

	#[test]
	fn integrates_constant_power() {
		let source = ConstantPower::new(2, 100.0);
		let sampler = AcceleratorSampler::spawn(Box::new(source), Duration::from_millis(5)).unwrap();
		let start = Instant::now();
		thread::sleep(Duration::from_millis(200));
		let after = sampler.snapshot().unwrap();
		let bound = 100.0 * start.elapsed().as_secs_f64() + 1.0;
		for joules in after {
			assert!(joules > 5.0, "integrated {joules} J");
			assert!(joules <= bound, "integrated {joules} J");
		}
	}

	#[test]
	fn read_failure_surfaces_in_snapshot() {
		let mut source = ConstantPower::new(2, 10.0);
		// first poll reads both units, the second fails on gpu1
		source.fail_after = Some(3);
		let sampler = AcceleratorSampler::spawn(Box::new(source), Duration::from_millis(2)).unwrap();
		thread::sleep(Duration::from_millis(100));
		match sampler.snapshot() {
			Err(HarnessError::AcceleratorRead { unit, reason }) => {
				assert_eq!(unit, "gpu1");
				assert_eq!(reason, "device lost");
			},
			other => panic!("unexpected {other:?}"),
		}
	}
}
