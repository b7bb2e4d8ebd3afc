use charger::{can, control, machine::Charger};
use data_io::{
    config,
    report,
    settings::{SettingsStore, TomlSettingsStore},
};
use global_state::{Command, SessionStore};
use hal::sysfs::SysfsHal;
use power_link::{serial::SerialPowerLink, PowerLink};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

mod charger;
mod data_io;
mod error;
mod global_state;
mod hal;
mod macros;
mod power_link;

#[tokio::main]
async fn main() -> Result<(), &'static str> {
    #[cfg(feature = "logging-verbose")]
    simple_logger::init_with_level(log::Level::Trace).expect("Logger init failed");
    #[cfg(not(feature = "logging-verbose"))]
    simple_logger::init_with_level(log::Level::Debug).expect("Logger init failed");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_FILE.into());
    let app_config = config::load(&config_path).map_err(|e| {
        log::error!("{config_path}: {e}");
        "config load failed"
    })?;
    log::debug!("{app_config:#?}");

    let mut settings_store =
        TomlSettingsStore::new(&app_config.charger.settings_file, app_config.limits);
    let settings = settings_store.load();

    let hal = SysfsHal::new(&app_config.gpio, &app_config.adc).map_err(|e| {
        log::error!("Hardware init {e}");
        "hardware init failed"
    })?;
    log::info!("{hal}");

    let power: Option<Box<dyn PowerLink + Send>> = match app_config.power_link.enabled {
        true => match SerialPowerLink::open(&app_config.power_link) {
            Ok(link) => Some(Box::new(link)),
            Err(e) => {
                log::error!("Power link unavailable, running without {e}");
                None
            }
        },
        false => {
            log::warn!("Power link not enabled in config");
            None
        }
    };

    let charger = Charger::new(hal, power, (&app_config).into(), settings);
    let store = SessionStore::new(Duration::from_millis(app_config.timing.lock_timeout_ms));
    let (command_tx, command_rx) = statics::command_channel();
    let (frame_tx, frame_rx): (statics::RawFrameTx, _) = statics::raw_frame_channel();
    let (snapshot_tx, snapshot_rx) = statics::snapshot_channel();

    let mut ctrl_c =
        signal(SignalKind::interrupt()).expect("Failed to create Ctrl-C signal handler");
    let quit_tx: statics::CommandTx = command_tx.clone();
    tokio::spawn(async move {
        ctrl_c.recv().await;
        log::warn!("Interrupt, shutting down");
        log_error!(
            "Quit",
            quit_tx
                .send(Command::Quit)
                .await
                .map_err(|_| error::ChargerError::ChannelClosed("command"))
        );
    });

    let can_handle = tokio::spawn(can::can_task(app_config.bus.clone(), store.clone(), frame_rx));
    tokio::spawn(can::supervise(can_handle, command_tx));
    tokio::spawn(report::report_task(
        snapshot_rx,
        Duration::from_millis(app_config.timing.report_interval_ms),
    ));

    control::control_task(
        charger,
        settings_store,
        store,
        command_rx,
        frame_tx,
        snapshot_tx,
        Duration::from_millis(app_config.timing.control_period_ms),
    )
    .await
    .map_err(|_| "control thread died")
}

pub mod statics {
    use crate::{charger::machine::SessionSnapshot, global_state::Command};
    use tes_0d02::RawFrame;
    use tokio::sync::{mpsc, watch};

    pub type Channel<T> = (mpsc::Sender<T>, mpsc::Receiver<T>);
    pub type CommandRx = mpsc::Receiver<Command>;
    pub type CommandTx = mpsc::Sender<Command>;
    pub type CommandChannel = Channel<Command>;
    pub type RawFrameRx = mpsc::Receiver<RawFrame>;
    pub type RawFrameTx = mpsc::Sender<RawFrame>;
    pub type RawFrameChannel = Channel<RawFrame>;
    pub type SnapshotTx = watch::Sender<SessionSnapshot>;
    pub type SnapshotRx = watch::Receiver<SessionSnapshot>;

    pub fn command_channel() -> CommandChannel {
        mpsc::channel::<Command>(16)
    }
    pub fn raw_frame_channel() -> RawFrameChannel {
        mpsc::channel::<RawFrame>(32)
    }
    pub fn snapshot_channel() -> (SnapshotTx, SnapshotRx) {
        watch::channel(SessionSnapshot::default())
    }
}
