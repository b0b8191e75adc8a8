pub mod msr;

/// Counts raw increments between two readings of a counter that wraps at `width` bits
///
/// # Arguments
///
/// * `start` - Earlier raw reading
/// * `end` - Later raw reading
/// * `width` - Number of significant counter bits (1..=64)
///
/// # Returns
///
/// The number of increments, assuming at most one wrap between the readings
pub const fn counter_delta(start: u64, end: u64, width: u32) -> u64 {
	let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
	end.wrapping_sub(start) & mask
}

/// Converts joules over an interval into watts; a zero interval yields zero.
pub fn average_watts(joules: f64, seconds: f64) -> f64 {
	if seconds > 0.0 { joules / seconds } else { 0.0 }
}
