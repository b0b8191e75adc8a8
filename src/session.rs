//! Measurement windows over the CPU counters and the accelerator accumulator.

use std::io;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::counter::CounterSource;
use crate::error::{HarnessError, Result};
use crate::power::{Report, Sample, WindowTotal};
use crate::sampler::EnergyAccumulator;
use crate::ticker::Ticker;
use crate::util::average_watts;

#[derive(Debug)]
struct Window {
	opened: Instant,
	previous_tick: Instant,
	accelerator_baseline: Vec<f64>,
	/// Joules per column consumed since `opened`
	energy: Vec<f64>,
	ticks: u64,
}

#[derive(Debug)]
enum SessionState {
	Idle,
	Active(Window),
}

/// Energy over the interval since the previous tick
struct Interval {
	elapsed: Duration,
	watts: Vec<f64>,
}

/// Reads both sources for the interval ending at `now` and folds it into the window
fn measure_interval(
	counters: &mut CounterSource,
	accelerators: &EnergyAccumulator,
	window: &mut Window,
	now: Instant,
) -> Result<Interval> {
	let elapsed = now.saturating_duration_since(window.previous_tick);
	let seconds = elapsed.as_secs_f64();

	let domains = counters.read_delta(elapsed)?;
	let snapshot = accelerators.snapshot()?;

	let mut joules = Vec::with_capacity(window.energy.len());
	let mut watts = Vec::with_capacity(window.energy.len());
	for delta in &domains {
		joules.push(delta.joules);
		watts.push(delta.watts);
	}
	for (current, baseline) in snapshot.iter().zip(&window.accelerator_baseline) {
		let consumed = current - baseline;
		joules.push(consumed);
		watts.push(average_watts(consumed, seconds));
	}

	for (total, consumed) in window.energy.iter_mut().zip(&joules) {
		*total += consumed;
	}
	window.accelerator_baseline = snapshot;
	window.previous_tick = now;

	Ok(Interval { elapsed, watts })
}

/// The windowing state machine
///
/// Reports are emitted in column order: energy domains first, then accelerators.
#[derive(Debug)]
pub struct SamplingSession {
	counters: CounterSource,
	accelerators: EnergyAccumulator,
	reports: Sender<Report>,
	state: SessionState,
}

impl SamplingSession {
	pub fn new(counters: CounterSource, accelerators: EnergyAccumulator, reports: Sender<Report>) -> Self {
		Self {
			counters,
			accelerators,
			reports,
			state: SessionState::Idle,
		}
	}

	pub fn is_active(&self) -> bool {
		matches!(self.state, SessionState::Active(_))
	}

	fn emit(&self, report: Report) -> Result<()> {
		self.reports
			.send(report)
			.map_err(|_| HarnessError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "reporter stopped")))
	}

	/// Opens a window at `now`; returns `false` if one was already open
	pub fn start(&mut self, now: Instant) -> Result<bool> {
		if self.is_active() {
			debug!("Window already open, ignoring start");
			return Ok(false);
		}

		self.counters.read_baseline()?;
		let accelerator_baseline = self.accelerators.snapshot()?;
		let columns = self.counters.domains().len() + accelerator_baseline.len();

		self.state = SessionState::Active(Window {
			opened: now,
			previous_tick: now,
			accelerator_baseline,
			energy: vec![0.0; columns],
			ticks: 0,
		});
		info!("Measurement window opened");
		Ok(true)
	}

	/// Emits one sample covering the time since the previous tick; ignored while idle
	pub fn tick(&mut self, now: Instant) -> Result<bool> {
		let SessionState::Active(window) = &mut self.state else {
			debug!("Dropping tick outside of a window");
			return Ok(false);
		};

		let interval = measure_interval(&mut self.counters, &self.accelerators, window, now)?;
		window.ticks += 1;
		let sample = Sample {
			at: now.saturating_duration_since(window.opened),
			elapsed: interval.elapsed,
			power: interval.watts,
		};
		self.emit(Report::Sample(sample))?;
		Ok(true)
	}

	/// Closes the window at `now` and emits its totals; ignored while idle
	///
	/// The interval since the last tick is read as well, so the totals cover the
	/// whole window.
	pub fn stop(&mut self, now: Instant) -> Result<bool> {
		let SessionState::Active(window) = &mut self.state else {
			debug!("No window open, ignoring stop");
			return Ok(false);
		};

		measure_interval(&mut self.counters, &self.accelerators, window, now)?;
		let total = WindowTotal {
			duration: now.saturating_duration_since(window.opened),
			energy: std::mem::take(&mut window.energy),
		};
		info!(
			"Measurement window closed after {:.3} s and {} ticks",
			total.duration.as_secs_f64(),
			window.ticks
		);

		self.state = SessionState::Idle;
		self.emit(Report::Total(total))?;
		Ok(true)
	}
}

fn lock(session: &Mutex<SamplingSession>) -> MutexGuard<'_, SamplingSession> {
	session.lock().unwrap_or_else(PoisonError::into_inner)
}

type FatalHandler = Arc<dyn Fn(HarnessError) + Send + Sync>;

/// Drives a [`SamplingSession`] from window-open/close requests and a periodic ticker
///
/// Ticks and transitions are serialized through the session mutex. Closing a
/// window disarms the ticker before the session is stopped, so no tick lands
/// after the totals.
pub struct WindowDriver {
	session: Arc<Mutex<SamplingSession>>,
	interval: Duration,
	ticker: Option<Ticker>,
	on_fatal: FatalHandler,
}

impl WindowDriver {
	/// `on_fatal` is called from the ticker thread when a tick fails
	pub fn new<F>(session: SamplingSession, interval: Duration, on_fatal: F) -> Self
	where
		F: Fn(HarnessError) + Send + Sync + 'static,
	{
		Self {
			session: Arc::new(Mutex::new(session)),
			interval,
			ticker: None,
			on_fatal: Arc::new(on_fatal),
		}
	}

	pub fn is_active(&self) -> bool {
		lock(&self.session).is_active()
	}

	/// Opens a window and arms the ticker; no-op if a window is already open
	pub fn open(&mut self) -> Result<()> {
		let now = Instant::now();
		if !lock(&self.session).start(now)? {
			return Ok(());
		}

		let session = self.session.clone();
		let on_fatal = self.on_fatal.clone();
		let ticker = Ticker::arm(now, self.interval, move |at| match lock(&session).tick(at) {
			Ok(_) => true,
			Err(e) => {
				on_fatal(e);
				false
			},
		})?;
		self.ticker = Some(ticker);
		Ok(())
	}

	/// Disarms the ticker and closes the window; no-op if no window is open
	pub fn close(&mut self) -> Result<()> {
		if let Some(ticker) = self.ticker.take() {
			ticker.disarm();
		}
		lock(&self.session).stop(Instant::now())?;
		Ok(())
	}
}

impl Drop for WindowDriver {
	fn drop(&mut self) {
		if let Some(ticker) = self.ticker.take() {
			ticker.disarm();
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::mpsc::{self, Receiver};

	use super::*;
	use crate::config::UnitSelection;
	use crate::counter::testing::FakeProvider;

	struct Rig {
		session: SamplingSession,
		counters: Arc<Mutex<Vec<u64>>>,
		accelerators: EnergyAccumulator,
		reports: Receiver<Report>,
	}

	/// Two CPU domains (one unavailable in between) and one accelerator
	fn rig() -> Rig {
		let provider = FakeProvider::new(vec![("cores", 0, true), ("gpu", 0, false), ("pkg", 0, true)]);
		let counters = provider.values.clone();
		let source = CounterSource::open(Box::new(provider), UnitSelection::Auto).unwrap();
		let accelerators = EnergyAccumulator::new(1);
		let (tx, rx) = mpsc::channel();
		Rig {
			session: SamplingSession::new(source, accelerators.clone(), tx),
			counters,
			accelerators,
			reports: rx,
		}
	}

	impl Rig {
		/// Advances cores by `cores` J, pkg by `pkg` J and the accelerator by `gpu` J
		fn consume(&self, cores: u64, pkg: u64, gpu: f64) {
			let mut values = self.counters.lock().unwrap();
			values[0] += cores;
			values[2] += pkg;
			self.accelerators.add(&[gpu]);
		}

		fn drain(&self) -> Vec<Report> {
			self.reports.try_iter().collect()
		}
	}

	fn secs(s: u64) -> Duration {
		Duration::from_secs(s)
	}

	#[test]
	fn tick_reports_power_since_previous_tick() {
		let mut rig = rig();
		let t0 = Instant::now();
		rig.consume(50, 50, 50.0);
		assert!(rig.session.start(t0).unwrap());

		rig.consume(10, 20, 30.0);
		assert!(rig.session.tick(t0 + secs(2)).unwrap());
		rig.consume(4, 4, 4.0);
		assert!(rig.session.tick(t0 + secs(3)).unwrap());

		let reports = rig.drain();
		assert_eq!(
			reports,
			vec![
				Report::Sample(Sample {
					at: secs(2),
					elapsed: secs(2),
					power: vec![5.0, 10.0, 15.0],
				}),
				Report::Sample(Sample {
					at: secs(3),
					elapsed: secs(1),
					power: vec![4.0, 4.0, 4.0],
				}),
			]
		);
	}

	#[test]
	fn ticks_sum_to_window_total() {
		let mut rig = rig();
		let t0 = Instant::now();
		rig.consume(1000, 1000, 1000.0);
		rig.session.start(t0).unwrap();

		let mut expected = [0.0; 3];
		for k in 1..=5u64 {
			rig.consume(k, 2 * k, 0.5 * k as f64);
			expected[0] += k as f64;
			expected[1] += 2.0 * k as f64;
			expected[2] += 0.5 * k as f64;
			rig.session.tick(t0 + Duration::from_millis(500 * k)).unwrap();
		}
		rig.session.stop(t0 + Duration::from_millis(2500)).unwrap();

		let reports = rig.drain();
		assert_eq!(reports.len(), 6);
		let mut summed = [0.0; 3];
		for report in &reports[..5] {
			let Report::Sample(sample) = report else { panic!("expected sample") };
			for (sum, joules) in summed.iter_mut().zip(sample.energy()) {
				*sum += joules;
			}
		}
		let Report::Total(total) = &reports[5] else { panic!("expected total") };
		assert_eq!(total.duration, Duration::from_millis(2500));
		for i in 0..3 {
			assert!((summed[i] - total.energy[i]).abs() < 1e-9);
			assert!((expected[i] - total.energy[i]).abs() < 1e-9);
		}
	}

	#[test]
	fn total_includes_tail_after_last_tick() {
		let mut rig = rig();
		let t0 = Instant::now();
		rig.session.start(t0).unwrap();
		rig.consume(5, 5, 5.0);
		rig.session.tick(t0 + secs(1)).unwrap();
		rig.consume(1, 2, 3.0);
		rig.session.stop(t0 + Duration::from_millis(1200)).unwrap();

		let reports = rig.drain();
		assert_eq!(reports.len(), 2);
		assert_eq!(
			reports[1],
			Report::Total(WindowTotal {
				duration: Duration::from_millis(1200),
				energy: vec![6.0, 7.0, 8.0],
			})
		);
	}

	#[test]
	fn transitions_outside_their_state_are_ignored() {
		let mut rig = rig();
		let t0 = Instant::now();

		assert!(!rig.session.tick(t0).unwrap());
		assert!(!rig.session.stop(t0).unwrap());
		assert!(rig.session.start(t0).unwrap());
		rig.consume(3, 3, 3.0);
		assert!(!rig.session.start(t0 + secs(1)).unwrap());
		assert!(rig.session.stop(t0 + secs(1)).unwrap());
		assert!(!rig.session.stop(t0 + secs(2)).unwrap());
		assert!(!rig.session.tick(t0 + secs(2)).unwrap());

		let reports = rig.drain();
		assert_eq!(reports.len(), 1);
		// the ignored second start did not reset the baseline
		assert_eq!(
			reports[0],
			Report::Total(WindowTotal {
				duration: secs(1),
				energy: vec![3.0, 3.0, 3.0],
			})
		);
	}

	#[test]
	fn windows_start_from_fresh_baselines() {
		let mut rig = rig();
		let t0 = Instant::now();
		rig.session.start(t0).unwrap();
		rig.consume(7, 7, 7.0);
		rig.session.stop(t0 + secs(1)).unwrap();

		// energy consumed while idle belongs to no window
		rig.consume(100, 100, 100.0);

		rig.session.start(t0 + secs(5)).unwrap();
		rig.consume(2, 2, 2.0);
		rig.session.stop(t0 + secs(6)).unwrap();

		let totals: Vec<_> = rig
			.drain()
			.into_iter()
			.filter_map(|r| match r {
				Report::Total(total) => Some(total.energy),
				Report::Sample(_) => None,
			})
			.collect();
		assert_eq!(totals, vec![vec![7.0, 7.0, 7.0], vec![2.0, 2.0, 2.0]]);
	}

	#[test]
	fn accelerator_failure_is_reported_by_tick() {
		let mut rig = rig();
		let t0 = Instant::now();
		rig.session.start(t0).unwrap();
		rig.accelerators.fail("gpu0".to_string(), "device lost".to_string());
		assert!(matches!(
			rig.session.tick(t0 + secs(1)),
			Err(HarnessError::AcceleratorRead { .. })
		));
	}

	#[test]
	fn driver_ticks_while_open_and_stops_on_close() {
		let rig = rig();
		let reports = rig.reports;
		let mut driver = WindowDriver::new(rig.session, Duration::from_millis(40), |e| panic!("{e}"));

		driver.close().unwrap();
		assert!(reports.try_recv().is_err());

		driver.open().unwrap();
		driver.open().unwrap();
		assert!(driver.is_active());
		std::thread::sleep(Duration::from_millis(150));
		driver.close().unwrap();
		assert!(!driver.is_active());
		std::thread::sleep(Duration::from_millis(100));

		let reports: Vec<_> = reports.try_iter().collect();
		let samples = reports.iter().filter(|r| matches!(r, Report::Sample(_))).count();
		assert_eq!(samples, 3);
		assert!(matches!(reports.last(), Some(Report::Total(_))));
	}

	#[test]
	fn driver_reports_failed_ticks() {
		let rig = rig();
		let accelerators = rig.accelerators.clone();
		let failures = Arc::new(Mutex::new(Vec::new()));
		let seen = failures.clone();
		let mut driver = WindowDriver::new(rig.session, Duration::from_millis(20), move |e| {
			seen.lock().unwrap().push(e.to_string());
		});

		driver.open().unwrap();
		accelerators.fail("gpu0".to_string(), "device lost".to_string());
		std::thread::sleep(Duration::from_millis(100));
		assert_eq!(failures.lock().unwrap().len(), 1);
		assert!(driver.close().is_err());
	}
}
