use crate::error::ChargerError;
use serde::Deserialize;
use std::{fs, path::Path};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Reads the application config. A missing file gives the built in defaults,
/// a file that exists but does not parse is an error.
pub fn load(path: impl AsRef<Path>) -> Result<AppConfig, ChargerError> {
    let path = path.as_ref();
    if !path.exists() {
        log::warn!("{} not found, using defaults", path.display());
        return Ok(AppConfig::default());
    }
    let toml_str = fs::read_to_string(path)?;
    Ok(toml::from_str(&toml_str)?)
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BusConfig {
    pub interface: String,
    /// Period of the 0x508/0x509/0x5F8 broadcast
    pub tx_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: "can0".into(),
            tx_interval_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub control_period_ms: u64,
    /// Longest wait for the shared frame store
    pub lock_timeout_ms: u64,
    pub cp_read_interval_ms: u32,
    pub report_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 20,
            lock_timeout_ms: 15,
            cp_read_interval_ms: 50,
            report_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CpConfig {
    /// Upper bound of the OFF band before hysteresis, volts
    pub off_max: f32,
    pub on_min: f32,
    pub on_max: f32,
    pub hysteresis: f32,
    /// Consecutive out of band readings before ERROR is reported
    pub error_threshold: u8,
    /// Samples averaged per reading
    pub sample_count: u8,
}

impl Default for CpConfig {
    fn default() -> Self {
        Self {
            off_max: 1.9,
            on_min: 7.4,
            on_max: 13.7,
            hysteresis: 0.3,
            error_threshold: 2,
            sample_count: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Margin above the vehicle voltage limit before charging stops, volts
    pub voltage_tolerance: f32,
    /// Time in DC output before the voltage limit is checked
    pub settle_ms: u32,
    /// Output voltage still present after finalization that is worth a warning
    pub residual_voltage: f32,
    /// Current setpoint pushed to the power supply on every stop path, amps
    pub safe_current: f32,
    /// Hardware range for settings, 0.1 V / 0.1 A / %
    pub min_voltage: u16,
    pub max_voltage: u16,
    pub min_current: u16,
    pub max_current: u16,
    pub min_soc: u8,
    pub max_soc: u8,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            voltage_tolerance: 1.0,
            settle_ms: 1000,
            residual_voltage: 10.0,
            safe_current: 0.0,
            min_voltage: 100,
            max_voltage: 1200,
            min_current: 10,
            max_current: 1000,
            min_soc: 10,
            max_soc: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChargerConfig {
    pub manufacturer_id: u16,
    pub sequence: u8,
    pub settings_file: String,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: 0x0000,
            sequence: 0x12,
            settings_file: "settings.toml".into(),
        }
    }
}

/// sysfs GPIO numbers
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GpioConfig {
    pub relay: u64,
    /// Auxiliary contact of the output relay, when wired
    pub relay_feedback: Option<u64>,
    pub lock: u64,
    pub vp_relay: u64,
    pub start_button: u64,
    pub stop_button: u64,
    pub emergency_button: u64,
}

impl Default for GpioConfig {
    fn default() -> Self {
        use crate::hal::sysfs::PinVal;
        Self {
            relay: PinVal::GPIO_P8_30 as u64,
            relay_feedback: None,
            lock: PinVal::GPIO_P8_16 as u64,
            vp_relay: PinVal::GPIO_P8_27 as u64,
            start_button: PinVal::GPIO_P9_23 as u64,
            stop_button: PinVal::GPIO_P9_25 as u64,
            emergency_button: PinVal::GPIO_P9_16 as u64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdcConfig {
    pub iio_device: String,
    pub cp_channel: u8,
    pub output_channel: u8,
    /// ADC reference, volts
    pub reference: f32,
    pub full_scale: u16,
    /// Input divider ratios
    pub cp_divider: f32,
    pub output_divider: f32,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            iio_device: "/sys/bus/iio/devices/iio:device0".into(),
            cp_channel: 0,
            output_channel: 1,
            reference: 1.8,
            full_scale: 4095,
            cp_divider: 8.0,
            output_divider: 100.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PowerLinkConfig {
    pub enabled: bool,
    pub device: String,
    pub baud_rate: u32,
    /// Link is considered lost after this long without a reading
    pub timeout_ms: u64,
}

impl Default for PowerLinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: "/dev/ttyS4".into(),
            baud_rate: 115_200,
            timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub timing: TimingConfig,
    pub cp: CpConfig,
    pub limits: LimitsConfig,
    pub charger: ChargerConfig,
    pub gpio: GpioConfig,
    pub adc: AdcConfig,
    pub power_link: PowerLinkConfig,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config() {
        let config: AppConfig = toml::from_str(
            r#"
            [bus]
            interface = "vcan0"

            [cp]
            hysteresis = 0.5

            [gpio]
            relay_feedback = 65
            "#,
        )
        .unwrap();
        assert_eq!(config.bus.interface, "vcan0");
        assert_eq!(config.bus.tx_interval_ms, 100);
        assert_eq!(config.cp.hysteresis, 0.5);
        assert_eq!(config.cp.error_threshold, 2);
        assert_eq!(config.gpio.relay_feedback, Some(65));
        assert_eq!(config.timing.control_period_ms, 20);
        assert_eq!(config.charger.sequence, 0x12);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.timing.lock_timeout_ms, 15);
        assert!(!config.power_link.enabled);
    }

    #[test]
    fn bad_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bus\ninterface = ").unwrap();
        assert!(matches!(load(&path), Err(ChargerError::TomlParse(_))));
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let config: AppConfig = toml::from_str(include_str!("../../../config.toml")).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.cp, defaults.cp);
        assert_eq!(config.limits, defaults.limits);
        assert_eq!(config.gpio.relay, defaults.gpio.relay);
        assert_eq!(config.gpio.emergency_button, defaults.gpio.emergency_button);
        assert_eq!(config.gpio.relay_feedback, None);
        assert_eq!(config.charger.sequence, defaults.charger.sequence);
        assert_eq!(config.power_link.baud_rate, defaults.power_link.baud_rate);
    }
}
