use super::{adc::AdcChannel, Button, Hal};
use crate::{
    data_io::config::{AdcConfig, GpioConfig},
    error::ChargerError,
};
use sysfs_gpio::Pin;

#[derive(Copy, Clone, Debug)]
pub struct Pins {
    pub relay: Pin,
    pub relay_feedback: Option<Pin>,
    pub lock: Pin,
    pub vp_relay: Pin,
    pub start: Pin,
    pub stop: Pin,
    pub emergency: Pin,
}

impl Pins {
    fn new(gpio: &GpioConfig) -> Result<Self, ChargerError> {
        Ok(Self {
            relay: pin_init_out_low(gpio.relay)?,
            relay_feedback: gpio.relay_feedback.map(pin_init_input).transpose()?,
            lock: pin_init_out_low(gpio.lock)?,
            vp_relay: pin_init_out_low(gpio.vp_relay)?,
            start: pin_init_input(gpio.start_button)?,
            stop: pin_init_input(gpio.stop_button)?,
            emergency: pin_init_input(gpio.emergency_button)?,
        })
    }
}

/// BeagleBone bay: relays and lock on sysfs GPIO, CP and output voltage on
/// the on-chip ADC. Front panel inputs are active low.
pub struct SysfsHal {
    pins: Pins,
    cp: AdcChannel,
    output: AdcChannel,
    relay_closed: bool,
}

impl SysfsHal {
    pub fn new(gpio: &GpioConfig, adc: &AdcConfig) -> Result<Self, ChargerError> {
        let pins = Pins::new(gpio)?;
        if pins.relay_feedback.is_none() {
            log::warn!("No relay feedback pin, relay state is not verified");
        }
        Ok(Self {
            pins,
            cp: AdcChannel::new(
                &adc.iio_device,
                adc.cp_channel,
                adc.reference,
                adc.full_scale,
                adc.cp_divider,
            ),
            output: AdcChannel::new(
                &adc.iio_device,
                adc.output_channel,
                adc.reference,
                adc.full_scale,
                adc.output_divider,
            ),
            relay_closed: false,
        })
    }
}

impl std::fmt::Display for SysfsHal {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "relay:{:?} lock:{:?} vp:{:?} start:{:?} stop:{:?} estop:{:?}",
            self.pins.relay.get_value(),
            self.pins.lock.get_value(),
            self.pins.vp_relay.get_value(),
            self.pins.start.get_value(),
            self.pins.stop.get_value(),
            self.pins.emergency.get_value(),
        )
    }
}

impl Hal for SysfsHal {
    fn read_cp_voltage(&mut self) -> Result<f32, ChargerError> {
        self.cp.read()
    }

    fn read_output_voltage(&mut self) -> Result<f32, ChargerError> {
        self.output.read()
    }

    fn set_relay(&mut self, closed: bool) -> Result<(), ChargerError> {
        self.pins.relay.set_value(closed.into())?;
        self.relay_closed = closed;
        Ok(())
    }

    fn set_lock(&mut self, locked: bool) -> Result<(), ChargerError> {
        Ok(self.pins.lock.set_value(locked.into())?)
    }

    fn set_vp_relay(&mut self, on: bool) -> Result<(), ChargerError> {
        Ok(self.pins.vp_relay.set_value(on.into())?)
    }

    fn relay_feedback(&mut self) -> Result<bool, ChargerError> {
        match self.pins.relay_feedback {
            Some(pin) => Ok(pin.get_value()? == 1),
            None => Ok(self.relay_closed),
        }
    }

    fn read_button(&mut self, button: Button) -> bool {
        let pin = match button {
            Button::Start => self.pins.start,
            Button::Stop => self.pins.stop,
            Button::Emergency => self.pins.emergency,
        };
        match pin.get_value() {
            Ok(value) => value == 0,
            Err(e) => {
                log::error!("{button:?} input read failed {e:?}");
                // a broken emergency input stops the charger
                button == Button::Emergency
            }
        }
    }
}

pub fn pin_init_out_low(pin: u64) -> Result<Pin, ChargerError> {
    let pin_out_low = Pin::new(pin);
    pin_out_low
        .export()
        .map_err(|_| ChargerError::PinInitError(pin))?;
    pin_out_low
        .set_direction(sysfs_gpio::Direction::Low)
        .map_err(|_| ChargerError::PinInitError(pin))?;
    Ok(pin_out_low)
}

pub fn pin_init_input(pin: u64) -> Result<Pin, ChargerError> {
    let pin_input = Pin::new(pin);
    pin_input
        .export()
        .map_err(|_| ChargerError::PinInitError(pin))?;
    pin_input
        .set_direction(sysfs_gpio::Direction::In)
        .map_err(|_| ChargerError::PinInitError(pin))?;
    Ok(pin_input)
}

/// Header pin to sysfs GPIO number, used for the default pin map
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone)]
pub(crate) enum PinVal {
    GPIO_P8_16 = 46,
    GPIO_P8_27 = 86,
    GPIO_P8_30 = 89,
    GPIO_P9_16 = 51,
    GPIO_P9_23 = 49,
    GPIO_P9_25 = 117,
}
