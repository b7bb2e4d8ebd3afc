use crate::error::ChargerError;
use std::{fs, path::PathBuf};

/// One IIO ADC input scaled back to the voltage in front of its divider
#[derive(Debug, Clone)]
pub struct AdcChannel {
    path: PathBuf,
    /// volts per count
    scale: f32,
}

impl AdcChannel {
    pub fn new(iio_device: &str, channel: u8, reference: f32, full_scale: u16, divider: f32) -> Self {
        Self {
            path: PathBuf::from(iio_device).join(format!("in_voltage{channel}_raw")),
            scale: reference / f32::from(full_scale.max(1)) * divider,
        }
    }

    pub fn read(&self) -> Result<f32, ChargerError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| ChargerError::AdcRead {
            path: self.path.display().to_string(),
            source,
        })?;
        let counts: u16 = raw
            .trim()
            .parse()
            .map_err(|_| ChargerError::AdcParse(raw.trim().to_string()))?;
        Ok(f32::from(counts) * self.scale)
    }
}
