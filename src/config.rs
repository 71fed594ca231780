//! Driver tuning.

/// Busy-poll budgets, counted in status-register reads.
///
/// These are iteration counts, not wall-clock durations: how long a budget
/// lasts depends on the SPI clock and the CPU. The defaults were tuned for a
/// 21 MHz bus and comfortably exceed a W25Q128JV sector erase (400 ms max).
/// Raise them for slower buses or chip erase heavy workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Status reads `wait_ready` performs before reporting a timeout.
    pub wait_ready_polls: u32,
    /// Status reads `is_busy` performs before conservatively reporting busy.
    pub busy_check_polls: u32,
}

impl Config {
    pub const DEFAULT_WAIT_READY_POLLS: u32 = 1_000_000;
    pub const DEFAULT_BUSY_CHECK_POLLS: u32 = 1_000_000;

    pub const fn new(wait_ready_polls: u32, busy_check_polls: u32) -> Self {
        Self {
            wait_ready_polls,
            busy_check_polls,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_WAIT_READY_POLLS,
            Self::DEFAULT_BUSY_CHECK_POLLS,
        )
    }
}
