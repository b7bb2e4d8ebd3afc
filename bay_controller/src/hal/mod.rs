pub mod adc;
pub mod sysfs;

use crate::error::ChargerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Start,
    Stop,
    Emergency,
}

/// Relays, lock, sensors and front panel inputs of one charging bay.
/// Every call returns within a bounded time.
pub trait Hal {
    /// Control pilot voltage after the input divider, volts
    fn read_cp_voltage(&mut self) -> Result<f32, ChargerError>;
    /// DC output voltage, volts
    fn read_output_voltage(&mut self) -> Result<f32, ChargerError>;
    fn set_relay(&mut self, closed: bool) -> Result<(), ChargerError>;
    fn set_lock(&mut self, locked: bool) -> Result<(), ChargerError>;
    /// Vehicle presence relay, powers the vehicle side CP circuit
    fn set_vp_relay(&mut self, on: bool) -> Result<(), ChargerError>;
    /// true when the output relay reports closed
    fn relay_feedback(&mut self) -> Result<bool, ChargerError>;
    /// Pressed / asserted. Implementations decide what a failed read means.
    fn read_button(&mut self, button: Button) -> bool;
}
