use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Periodic callback on a dedicated thread
///
/// Ticks are scheduled at `origin + k * interval` so the period does not drift
/// with the time spent inside the callback. Deadlines that were missed while a
/// callback ran are skipped rather than fired in a burst.
pub struct Ticker {
	stop: mpsc::Sender<()>,
	handle: JoinHandle<()>,
}

impl Ticker {
	/// Starts ticking; `on_tick` receives the firing time and returns `false` to stop
	pub fn arm<F>(origin: Instant, interval: Duration, mut on_tick: F) -> io::Result<Self>
	where
		F: FnMut(Instant) -> bool + Send + 'static,
	{
		let (stop, stop_rx) = mpsc::channel::<()>();

		let handle = thread::Builder::new().name("tick-driver".into()).spawn(move || {
			let mut deadline = origin + interval;
			loop {
				let timeout = deadline.saturating_duration_since(Instant::now());
				match stop_rx.recv_timeout(timeout) {
					Err(RecvTimeoutError::Timeout) => {},
					Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
				}

				if !on_tick(Instant::now()) {
					return;
				}

				let now = Instant::now();
				deadline += interval;
				while deadline <= now {
					deadline += interval;
				}
			}
		})?;

		Ok(Self { stop, handle })
	}

	/// Stops the ticker and waits for an in-flight tick to finish
	pub fn disarm(self) {
		let _ = self.stop.send(());
		let _ = self.handle.join();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use super::*;

	#[test]
	fn ticks_at_interval_until_disarmed() {
		let fired = Arc::new(Mutex::new(Vec::new()));
		let recorder = fired.clone();
		let origin = Instant::now();
		let ticker = Ticker::arm(origin, Duration::from_millis(50), move |at| {
			recorder.lock().unwrap().push(at);
			true
		})
		.unwrap();

		thread::sleep(Duration::from_millis(230));
		ticker.disarm();
		let count = fired.lock().unwrap().len();
		thread::sleep(Duration::from_millis(120));

		let fired = fired.lock().unwrap();
		assert_eq!(fired.len(), count, "tick delivered after disarm");
		assert_eq!(count, 4);
		for (k, at) in fired.iter().enumerate() {
			assert!(*at >= origin + Duration::from_millis(50) * (k as u32 + 1));
		}
	}

	#[test]
	fn callback_can_stop_ticking() {
		let fired = Arc::new(Mutex::new(0));
		let recorder = fired.clone();
		let ticker = Ticker::arm(Instant::now(), Duration::from_millis(10), move |_| {
			*recorder.lock().unwrap() += 1;
			false
		})
		.unwrap();

		thread::sleep(Duration::from_millis(100));
		ticker.disarm();
		assert_eq!(*fired.lock().unwrap(), 1);
	}

	#[test]
	fn disarm_before_first_tick() {
		let ticker = Ticker::arm(Instant::now(), Duration::from_secs(60), |_| panic!("should not tick")).unwrap();
		ticker.disarm();
	}
}
