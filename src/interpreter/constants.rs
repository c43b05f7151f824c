// Constants for the script runtime

/// Units of evaluation work a job may perform per heartbeat tick
pub const DEFAULT_STEP: u32 = 64;

/// Heartbeat period in microseconds; bounds how long a runnable job can go
/// without the reactor regaining control
pub const HEARTBEAT_US: u64 = 500_000;

/// Per-job open-file budget
pub const MAX_OPENFILE: usize = 67;
