use std::{
    thread,
    time::{Duration, Instant},
};

use crate::error::HwError;

pub trait ByteTransport {
    fn discard_input(&mut self) -> Result<(), HwError>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HwError>;

    /// Blocks for at most `timeout_ms`. Returns 0 when the slice expired idle.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize, HwError>;
}

pub trait PowerKey {
    fn set_level(&mut self, high: bool) -> Result<(), HwError>;
}

pub trait MotionInput {
    fn is_active(&mut self) -> bool;
}

pub trait BatteryGauge {
    fn wake(&mut self) {}

    fn read_vcell_raw(&mut self) -> Result<u16, HwError>;

    fn release(&mut self) {}
}

pub trait Clock {
    fn now_ms(&self) -> u64;
    fn delay_ms(&mut self, ms: u64);
}

#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}
