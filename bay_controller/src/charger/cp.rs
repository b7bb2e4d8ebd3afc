use crate::{data_io::config::CpConfig, hal::Hal};
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CpState {
    /// Not read since boot
    #[default]
    Unknown,
    /// Plug out / vehicle not ready
    Off,
    On,
    Error,
}

/// Band edges are inclusive, readings this close to an edge count as on it
const EDGE_TOLERANCE: f32 = 1e-3;

/// Control pilot classifier. Out of band readings only become ERROR after
/// `error_threshold` of them in a row.
#[derive(Debug, Clone, Copy)]
pub struct CpMonitor {
    config: CpConfig,
    error_count: u8,
    state: CpState,
    voltage: f32,
}

impl CpMonitor {
    pub fn new(config: CpConfig) -> Self {
        Self {
            config,
            error_count: 0,
            state: CpState::Unknown,
            voltage: 0.0,
        }
    }

    pub fn state(&self) -> CpState {
        self.state
    }

    /// Last averaged reading, volts
    pub fn voltage(&self) -> f32 {
        self.voltage
    }

    fn classify(&self, voltage: f32) -> CpState {
        let c = &self.config;
        let off_edge = c.off_max - c.hysteresis + EDGE_TOLERANCE;
        let on_edge = c.on_min + c.hysteresis - EDGE_TOLERANCE;
        if (0.0..=off_edge).contains(&voltage) {
            CpState::Off
        } else if (on_edge..=c.on_max + EDGE_TOLERANCE).contains(&voltage) {
            CpState::On
        } else {
            CpState::Error
        }
    }

    pub fn update(&mut self, voltage: f32) -> CpState {
        self.voltage = voltage;
        match self.classify(voltage) {
            CpState::Error => {
                self.error_count = self.error_count.saturating_add(1);
                if self.error_count >= self.config.error_threshold {
                    if self.state != CpState::Error {
                        log::warn!("CP error at {voltage:.2}V");
                    }
                    self.state = CpState::Error;
                }
            }
            detected => {
                self.error_count = 0;
                if detected != self.state {
                    log::debug!("CP {:?} -> {detected:?} ({voltage:.2}V)", self.state);
                }
                self.state = detected;
            }
        }
        self.state
    }

    /// Averages `sample_count` readings. A failed read makes the whole reading
    /// out of band.
    pub fn sample<H: Hal>(&mut self, hal: &mut H) -> CpState {
        let count = self.config.sample_count.max(1);
        let mut sum = 0.0;
        for _ in 0..count {
            match hal.read_cp_voltage() {
                Ok(v) => sum += v,
                Err(e) => {
                    log::error!("CP read {e}");
                    return self.update(f32::NAN);
                }
            }
        }
        self.update(sum / f32::from(count))
    }
}
