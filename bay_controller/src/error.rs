use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChargerError {
    #[error("Can bus open failed {0:?}")]
    CanOpen(tokio_socketcan::Error),
    #[error("Bad {0:#05x} TX")]
    CanTx(u32),
    #[error("Can frame build failed for {0:#05x}")]
    FrameBuild(u32),
    #[error("{0:#05x} send failed {1:?}")]
    CanBusWrite(u32, std::io::Error),
    #[error("Pin init fail for {0}")]
    PinInitError(u64),
    #[error("GPIO error {0:?}")]
    PinAccess(#[from] sysfs_gpio::Error),
    #[error("ADC read failed on {path} {source:?}")]
    AdcRead {
        path: String,
        source: std::io::Error,
    },
    #[error("ADC value {0:?} is not a number")]
    AdcParse(String),
    #[error("File access failed {0:?}")]
    FileAccess(#[from] std::io::Error),
    #[error("Toml parse failed {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Toml serialise failed {0}")]
    TomlSerialise(#[from] toml::ser::Error),
    #[error("Serial port error {0}")]
    SerialPort(#[from] serialport::Error),
    #[error("json serialise {0:?}")]
    Serialise(#[from] serde_json::Error),
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}
