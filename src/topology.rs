use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Parses a kernel CPU list such as `0,18-19` into individual CPU ids
pub fn parse_cpu_list(list: &str) -> Vec<usize> {
	let mut cpus = Vec::new();
	for part in list.trim().split(',').filter(|p| !p.is_empty()) {
		match part.split_once('-') {
			Some((lo, hi)) => {
				if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
					cpus.extend(lo..=hi);
				}
			},
			None => {
				if let Ok(cpu) = part.parse::<usize>() {
					cpus.push(cpu);
				}
			},
		}
	}
	cpus
}

/// Returns the lowest-numbered CPU of every physical package
///
/// This reads `cpuN/topology/physical_package_id` under the sysfs CPU directory.
/// RAPL package counters are shared by every CPU of a package, so one reader
/// per package is enough.
pub fn package_leaders(cpu_dir: &Path) -> Vec<usize> {
	let mut leaders: BTreeMap<i64, usize> = BTreeMap::new();

	if let Ok(entries) = fs::read_dir(cpu_dir) {
		for entry in entries.filter_map(Result::ok) {
			let filename = entry.file_name();
			let filename = filename.to_string_lossy();

			// Look for cpuN directories
			let Some(cpu_id) = filename.strip_prefix("cpu").and_then(|id| id.parse::<usize>().ok()) else {
				continue;
			};

			let package_path = entry.path().join("topology/physical_package_id");
			if let Ok(package) = fs::read_to_string(&package_path) {
				if let Ok(package) = package.trim().parse::<i64>() {
					leaders
						.entry(package)
						.and_modify(|leader| *leader = (*leader).min(cpu_id))
						.or_insert(cpu_id);
				}
			}
		}
	}

	let mut cpus: Vec<usize> = leaders.into_values().collect();
	cpus.sort_unstable();
	cpus
}
