pub mod serial;

/// External DC power supply that takes voltage/current setpoints and reports
/// its measured output
pub trait PowerLink {
    fn connected(&self) -> bool;
    fn set_voltage(&mut self, volts: f32);
    fn set_current(&mut self, amps: f32);
    /// Last reported output voltage, volts
    fn voltage(&self) -> f32;
    /// Last reported output current, amps
    fn current(&self) -> f32;
}

/// Lines longer than this are noise and get dropped
pub const MAX_LINE: usize = 128;
/// Setpoint changes at or below this are not resent
pub const SETPOINT_DEADBAND: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub voltage: f32,
    pub current: f32,
}

/// Parses a `V=<volts>,I=<amps>` status line
pub fn parse_reading(line: &str) -> Option<Reading> {
    let (voltage, current) = line.trim().strip_prefix("V=")?.split_once(",I=")?;
    Some(Reading {
        voltage: voltage.trim().parse().ok()?,
        current: current.trim().parse().ok()?,
    })
}

pub fn set_voltage_line(volts: f32) -> String {
    format!("SET:V={volts:.2}\r\n")
}

pub fn set_current_line(amps: f32) -> String {
    format!("SET:I={amps:.2}\r\n")
}

/// Collects bytes into newline terminated lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    line: String,
}

impl LineBuffer {
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\n' => Some(std::mem::take(&mut self.line)),
            _ if self.line.len() >= MAX_LINE => {
                log::warn!("Power link line over {MAX_LINE} bytes dropped");
                self.line.clear();
                None
            }
            _ => {
                self.line.push(char::from(byte));
                None
            }
        }
    }
}

/// Remembers the last value sent so unchanged setpoints stay off the wire
#[derive(Debug, Default, Clone, Copy)]
pub struct SetpointFilter {
    last: Option<f32>,
}

impl SetpointFilter {
    /// true when `value` should be sent, and records it as sent
    pub fn update(&mut self, value: f32) -> bool {
        match self.last {
            Some(last) if (value - last).abs() <= SETPOINT_DEADBAND => false,
            _ => {
                self.last = Some(value);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
