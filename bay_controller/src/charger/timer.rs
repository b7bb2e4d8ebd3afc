use serde::Serialize;
use tes_0d02::{CHARGE_TIME_UNLIMITED, REMAINING_TIME_UNKNOWN};

/// Monotonic millisecond tick that wraps at u32::MAX
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Millis(pub u32);

impl Millis {
    /// Milliseconds from `earlier` to `self`, correct across one wrap
    pub fn since(self, earlier: Millis) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    pub fn add(self, ms: u32) -> Millis {
        Millis(self.0.wrapping_add(ms))
    }
}

/// Session charge timer, counted in whole seconds
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ChargeTimer {
    running: bool,
    elapsed_s: u32,
    total_s: u32,
    last_mark: Millis,
}

impl ChargeTimer {
    pub fn start(&mut self, now: Millis) {
        self.running = true;
        self.elapsed_s = 0;
        self.total_s = 0;
        self.last_mark = now;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.elapsed_s = 0;
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// Takes the charge time limit from the BMS, in minutes
    pub fn set_limit(&mut self, max_charge_time: u16) {
        if !self.running || max_charge_time == CHARGE_TIME_UNLIMITED {
            return;
        }
        let total_s = u32::from(max_charge_time) * 60;
        if total_s != self.total_s {
            log::info!("Total charge time updated by BMS to {max_charge_time} min");
            self.total_s = total_s;
        }
    }

    pub fn update(&mut self, now: Millis) {
        if !self.running {
            return;
        }
        let whole_s = now.since(self.last_mark) / 1000;
        if whole_s > 0 {
            self.elapsed_s += whole_s;
            self.last_mark = self.last_mark.add(whole_s * 1000);
        }
    }

    pub fn elapsed_s(&self) -> u32 {
        self.elapsed_s
    }

    pub fn total_s(&self) -> u32 {
        self.total_s
    }

    pub fn remaining_s(&self) -> u32 {
        if self.running {
            self.total_s.saturating_sub(self.elapsed_s)
        } else {
            0
        }
    }

    /// Limit set by the BMS has run out
    pub fn expired(&self) -> bool {
        self.running && self.total_s > 0 && self.remaining_s() == 0
    }

    /// Remaining time as sent in 0x509, rounded to the nearest minute
    pub fn remaining_minutes(&self) -> u16 {
        match self.running {
            true => ((self.remaining_s() + 30) / 60).min(u32::from(REMAINING_TIME_UNKNOWN - 1)) as u16,
            false => REMAINING_TIME_UNKNOWN,
        }
    }
}
