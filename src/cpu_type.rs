use std::fs;

/// Represents CPU manufacturer types that can be detected
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpuType {
	/// Intel CPU architecture
	Intel,
	/// AMD CPU architecture
	Amd,
	/// Any other CPU architecture not explicitly supported
	Unsupported,
}

/// Detects the CPU manufacturer by reading /proc/cpuinfo
pub fn detect_cpu_type() -> CpuType {
	let cpuinfo = fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
	cpu_type_from_cpuinfo(&cpuinfo)
}

fn cpu_type_from_cpuinfo(cpuinfo: &str) -> CpuType {
	if cpuinfo.contains("GenuineIntel") {
		CpuType::Intel
	} else if cpuinfo.contains("AuthenticAMD") || cpuinfo.contains("HygonGenuine") {
		CpuType::Amd
	} else {
		CpuType::Unsupported
	}
}
