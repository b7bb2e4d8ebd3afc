use super::config::LimitsConfig;
use crate::error::ChargerError;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// User adjustable charger limits, persisted across power cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// 0.1 V
    pub max_voltage: u16,
    /// 0.1 A
    pub max_current: u16,
    /// %
    pub target_soc: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_voltage: 1000,
            max_current: 100,
            target_soc: 100,
        }
    }
}

impl Settings {
    pub fn clamped(self, limits: &LimitsConfig) -> Self {
        Self {
            max_voltage: self.max_voltage.clamp(limits.min_voltage, limits.max_voltage),
            max_current: self.max_current.clamp(limits.min_current, limits.max_current),
            target_soc: self.target_soc.clamp(limits.min_soc, limits.max_soc),
        }
    }

    /// New current limit and target SOC, voltage limit unchanged
    pub fn with_request(self, max_current: u16, target_soc: u8, limits: &LimitsConfig) -> Self {
        Self {
            max_current,
            target_soc,
            ..self
        }
        .clamped(limits)
    }

    pub fn max_voltage_v(&self) -> f32 {
        f32::from(self.max_voltage) / 10.0
    }
    pub fn max_current_a(&self) -> f32 {
        f32::from(self.max_current) / 10.0
    }
}

pub trait SettingsStore {
    /// Never fails, falls back to defaults
    fn load(&mut self) -> Settings;
    fn save(&mut self, settings: &Settings) -> Result<(), ChargerError>;
}

pub struct TomlSettingsStore {
    path: PathBuf,
    limits: LimitsConfig,
}

impl TomlSettingsStore {
    pub fn new(path: impl AsRef<Path>, limits: LimitsConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            limits,
        }
    }

    fn read(&self) -> Result<Settings, ChargerError> {
        let toml_str = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&toml_str)?)
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&mut self) -> Settings {
        if !self.path.exists() {
            log::info!("No settings at {}, saving defaults", self.path.display());
            let settings = Settings::default();
            crate::log_error!("Save default settings", self.save(&settings));
            return settings;
        }
        match self.read() {
            Ok(settings) => {
                let clamped = settings.clamped(&self.limits);
                if clamped != settings {
                    log::warn!("Stored settings {settings:?} outside hardware range, using {clamped:?}");
                }
                clamped
            }
            Err(e) => {
                log::error!("Settings load failed {e}, using defaults");
                Settings::default()
            }
        }
    }

    fn save(&mut self, settings: &Settings) -> Result<(), ChargerError> {
        let toml_str = toml::to_string(settings)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, toml_str)?;
        fs::rename(&tmp, &self.path)?;
        log::info!("Settings saved {settings:?}");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_boot_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut store = TomlSettingsStore::new(&path, LimitsConfig::default());
        assert_eq!(store.load(), Settings::default());
        assert!(path.exists());

        let saved = Settings {
            max_voltage: 840,
            max_current: 250,
            target_soc: 80,
        };
        store.save(&saved).unwrap();
        let mut store = TomlSettingsStore::new(&path, LimitsConfig::default());
        assert_eq!(store.load(), saved);
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "max_voltage = \"lots\"").unwrap();
        let mut store = TomlSettingsStore::new(&path, LimitsConfig::default());
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn request_is_clamped() {
        let limits = LimitsConfig::default();
        let settings = Settings::default().with_request(5000, 5, &limits);
        assert_eq!(settings.max_current, 1000);
        assert_eq!(settings.target_soc, 10);
        assert_eq!(settings.max_voltage, 1000);

        let settings = Settings::default().with_request(0, 101, &limits);
        assert_eq!(settings.max_current, 10);
        assert_eq!(settings.target_soc, 100);
    }
}
