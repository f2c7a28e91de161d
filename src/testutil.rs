//! Host-side mock hardware used by the `#[cfg(test)]` modules throughout
//! the crate. None of this ships in the firmware binary.

use crate::hal::{Clock, EdgeIrq, HidSink, InputPin, OneShotTimer, OutputPin};
use core::cell::Cell;

#[derive(Default)]
pub struct MockPin {
    pub high: Cell<bool>,
}

impl InputPin for &MockPin {
    fn is_high(&mut self) -> bool {
        self.high.get()
    }
}

impl OutputPin for &MockPin {
    fn set_high(&mut self) {
        self.high.set(true);
    }
    fn set_low(&mut self) {
        self.high.set(false);
    }
}

#[derive(Default)]
pub struct MockEdgeIrq {
    pub rising: Cell<bool>,
    pub falling: Cell<bool>,
    pub enabled: Cell<bool>,
}

impl EdgeIrq for &MockEdgeIrq {
    fn enable_rising(&mut self) {
        self.rising.set(true);
        self.falling.set(false);
        self.enabled.set(true);
    }
    fn enable_falling(&mut self) {
        self.falling.set(true);
        self.rising.set(false);
        self.enabled.set(true);
    }
    fn disable(&mut self) {
        self.enabled.set(false);
    }
    fn acknowledge(&mut self) {}
}

#[derive(Default)]
pub struct MockTimer {
    pub armed_for: Cell<Option<u32>>,
}

impl OneShotTimer for &MockTimer {
    fn start(&mut self, micros: u32) {
        self.armed_for.set(Some(micros));
    }
    fn cancel(&mut self) {
        self.armed_for.set(None);
    }
}

pub struct MockClock;

impl Clock for MockClock {
    fn micros(&self) -> u32 {
        0
    }
    fn busy_wait_micros(&self, _micros: u32) {}
    fn wait_for_interrupt(&self) {}
}

#[derive(Default)]
pub struct MockHid {
    pub reports: std::vec::Vec<std::vec::Vec<u8>>,
}

impl HidSink for MockHid {
    fn send_report(&mut self, report: &[u8]) -> Result<(), crate::error::Error> {
        self.reports.push(report.to_vec());
        Ok(())
    }
}
