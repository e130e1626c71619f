//! Completion wait strategies
//!
//! After a trigger the host blocks until the device raises
//! [`DONE_MASK`](accel_backends::regs::DONE_MASK) in the control register. This is the
//! only suspension point of an invocation. The default [`SpinPoll`] has no deadline, so
//! a device that never completes blocks the caller forever; configure
//! [`PollConfig::timeout_ms`] to bound it.

use crate::config::PollConfig;
use crate::error::{Error, Result};
use accel_backends::{regs, AcceleratorDriver};
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of a completed wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    /// Status register reads, including the one that saw completion
    pub polls: u64,
    /// Time spent waiting
    pub elapsed: Duration,
}

/// How the host waits for the device to finish a run
pub trait WaitStrategy {
    /// Block until the device signals completion
    ///
    /// # Errors
    ///
    /// `DeviceIo` if a status read fails; `DeviceTimeout` if the strategy has a deadline
    /// and it passes.
    fn wait_for_completion(&self, driver: &mut dyn AcceleratorDriver) -> Result<PollStats>;
}

/// Read the status register, sleeping a fixed interval between reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinPoll {
    interval: Duration,
    deadline: Option<Duration>,
}

impl SpinPoll {
    /// Poll every `interval` with no deadline
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Fail with `DeviceTimeout` once `deadline` has elapsed
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sleep between status reads
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Configured deadline, if any
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

impl Default for SpinPoll {
    fn default() -> Self {
        Self::from(PollConfig::default())
    }
}

impl From<PollConfig> for SpinPoll {
    fn from(config: PollConfig) -> Self {
        Self {
            interval: config.interval(),
            deadline: config.deadline(),
        }
    }
}

impl WaitStrategy for SpinPoll {
    fn wait_for_completion(&self, driver: &mut dyn AcceleratorDriver) -> Result<PollStats> {
        let start = Instant::now();
        let mut polls = 0u64;

        loop {
            let status = driver
                .read_register(regs::CONTROL)
                .map_err(|source| Error::DeviceIo {
                    op: "status poll",
                    source,
                })?;
            polls += 1;

            if status & regs::DONE_MASK != 0 {
                return Ok(PollStats {
                    polls,
                    elapsed: start.elapsed(),
                });
            }

            if let Some(deadline) = self.deadline {
                let elapsed = start.elapsed();
                if elapsed >= deadline {
                    tracing::warn!(polls, elapsed_us = elapsed.as_micros() as u64, "completion_deadline_exceeded");
                    return Err(Error::DeviceTimeout { polls, elapsed });
                }
            }

            if self.interval.is_zero() {
                std::hint::spin_loop();
            } else {
                thread::sleep(self.interval);
            }
        }
    }
}
