use super::machine::{Charger, MachineConfig};
use crate::{
    data_io::settings::Settings,
    error::ChargerError,
    hal::{Button, Hal},
    power_link::PowerLink,
};
use std::sync::{Arc, Mutex};
use tes_0d02::*;

#[derive(Debug, Default)]
pub struct MockHal {
    pub cp_voltage: f32,
    pub cp_fails: bool,
    pub output_voltage: f32,
    pub relay: bool,
    pub lock: bool,
    pub vp_relay: bool,
    /// Relay auxiliary contact is broken and always reads open
    pub feedback_broken: bool,
    pub start: bool,
    pub stop: bool,
    pub emergency: bool,
    /// CP voltage at every relay close command
    pub relay_closed_at_cp: Vec<f32>,
}

impl Hal for MockHal {
    fn read_cp_voltage(&mut self) -> Result<f32, ChargerError> {
        match self.cp_fails {
            true => Err(ChargerError::AdcParse("mock".into())),
            false => Ok(self.cp_voltage),
        }
    }
    fn read_output_voltage(&mut self) -> Result<f32, ChargerError> {
        Ok(self.output_voltage)
    }
    fn set_relay(&mut self, closed: bool) -> Result<(), ChargerError> {
        if closed {
            self.relay_closed_at_cp.push(self.cp_voltage);
        }
        self.relay = closed;
        Ok(())
    }
    fn set_lock(&mut self, locked: bool) -> Result<(), ChargerError> {
        self.lock = locked;
        Ok(())
    }
    fn set_vp_relay(&mut self, on: bool) -> Result<(), ChargerError> {
        self.vp_relay = on;
        Ok(())
    }
    fn relay_feedback(&mut self) -> Result<bool, ChargerError> {
        Ok(self.relay && !self.feedback_broken)
    }
    fn read_button(&mut self, button: Button) -> bool {
        match button {
            Button::Start => self.start,
            Button::Stop => self.stop,
            Button::Emergency => self.emergency,
        }
    }
}

#[derive(Debug, Default)]
pub struct LinkState {
    pub connected: bool,
    pub voltage_setpoints: Vec<f32>,
    pub current_setpoints: Vec<f32>,
    pub voltage: f32,
    pub current: f32,
}

/// Power link whose state stays visible to the test after the charger owns it
#[derive(Debug, Clone, Default)]
pub struct MockPowerLink(pub Arc<Mutex<LinkState>>);

impl PowerLink for MockPowerLink {
    fn connected(&self) -> bool {
        self.0.lock().unwrap().connected
    }
    fn set_voltage(&mut self, volts: f32) {
        self.0.lock().unwrap().voltage_setpoints.push(volts);
    }
    fn set_current(&mut self, amps: f32) {
        self.0.lock().unwrap().current_setpoints.push(amps);
    }
    fn voltage(&self) -> f32 {
        self.0.lock().unwrap().voltage
    }
    fn current(&self) -> f32 {
        self.0.lock().unwrap().current
    }
}

pub fn charger() -> Charger<MockHal> {
    let hal = MockHal {
        cp_voltage: 12.0,
        ..Default::default()
    };
    Charger::new(hal, None, MachineConfig::default(), Settings::default())
}

/// 0x500 with the given status bits, 10 A request, 100 V limit, 120 V max
pub fn vehicle(status: VehicleStatusFlags) -> VehicleData {
    VehicleData {
        status: VehicleStatus {
            faults: VehicleFaults::empty(),
            status,
            current_request: 100,
            voltage_limit: 1000,
            max_voltage: 1200,
        },
        params: VehicleParams {
            sequence: 1,
            soc: 50,
            ..Default::default()
        },
        emergency: VehicleEmergency::default(),
    }
}

/// Permission granted, contactor closed
pub fn ready_vehicle() -> VehicleData {
    vehicle(VehicleStatusFlags::CHARGE_PERMISSION)
}
