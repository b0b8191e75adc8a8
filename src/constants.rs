// AMD RAPL MSR addresses
pub const AMD_ENERGY_UNIT_MSR: u32 = 0xC001_0299;
pub const AMD_ENERGY_CORE_MSR: u32 = 0xC001_029A;
pub const AMD_ENERGY_PKG_MSR: u32 = 0xC001_029B;

// Intel RAPL MSR addresses
pub const INTEL_POWER_UNIT_MSR: u32 = 0x606;
pub const INTEL_PKG_ENERGY_MSR: u32 = 0x611;
pub const INTEL_DRAM_ENERGY_MSR: u32 = 0x619;
pub const INTEL_PP0_ENERGY_MSR: u32 = 0x639;
pub const INTEL_PP1_ENERGY_MSR: u32 = 0x641;
pub const INTEL_PLATFORM_ENERGY_MSR: u32 = 0x64D;

/// Width of the RAPL energy status field in the MSRs.
pub const MSR_COUNTER_BITS: u32 = 32;
/// perf accumulates RAPL into a 64-bit software counter.
pub const PERF_COUNTER_BITS: u32 = 64;

/// RAPL domains in report order.
pub const RAPL_DOMAINS: [&str; 5] = ["cores", "gpu", "pkg", "ram", "psys"];

// Linux sysfs locations
pub const PERF_POWER_PMU_DIR: &str = "/sys/bus/event_source/devices/power";
pub const SYSFS_CPU_DIR: &str = "/sys/devices/system/cpu";

// Sampling settings
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 500;
pub const MAX_TICK_INTERVAL_MS: u64 = 1000;
pub const ACCELERATOR_POLL_INTERVAL_US: u64 = 14_992; // ~66.7 Hz

// Region of interest sentinels
pub const ROI_START_MARKER: &str = "++ROI";
pub const ROI_END_MARKER: &str = "--ROI";
