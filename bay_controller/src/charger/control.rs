use super::{
    machine::{Charger, FrameSink, SessionSnapshot},
    timer::Millis,
};
use crate::{
    data_io::settings::SettingsStore,
    error::ChargerError,
    global_state::{Command, SessionStore},
    hal::Hal,
    log_error,
    statics::{CommandRx, SnapshotTx},
};
use std::time::Duration;
use tokio::{
    sync::mpsc::error::TryRecvError,
    time::{interval, Instant, MissedTickBehavior},
};

/// Fixed period control loop. Owns the state machine; everything it learns
/// from the bus comes through the store and everything it says goes back
/// through the store or the immediate sink.
pub async fn control_task<H, S>(
    mut charger: Charger<H>,
    mut settings_store: S,
    store: SessionStore,
    mut command_rx: CommandRx,
    mut sink: impl FrameSink,
    snapshot_tx: SnapshotTx,
    period: Duration,
) -> Result<(), ChargerError>
where
    H: Hal,
    S: SettingsStore,
{
    log::info!("Starting control thread {} every {period:?}", tokio::task::id());
    let start = Instant::now();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let tick_start = Instant::now();

        loop {
            match command_rx.try_recv() {
                Ok(Command::Quit) => {
                    charger.shutdown();
                    store.write_charger_outgoing(charger.outgoing()).await;
                    log_error!("Final snapshot", publish(&snapshot_tx, charger.snapshot()), warn);
                    return Ok(());
                }
                Ok(command) => apply_command(&mut charger, &mut settings_store, command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("Command channel closed");
                    break;
                }
            }
        }

        let vehicle = store.read_vehicle_snapshot().await;
        let now = Millis(start.elapsed().as_millis() as u32);
        charger.tick(now, vehicle, &mut sink);
        store.write_charger_outgoing(charger.outgoing()).await;
        // nobody watching is fine
        let _ = publish(&snapshot_tx, charger.snapshot());

        let took = tick_start.elapsed();
        if took > period {
            log::warn!("Control tick overran {took:?}");
        }
    }
}

fn apply_command<H: Hal, S: SettingsStore>(
    charger: &mut Charger<H>,
    settings_store: &mut S,
    command: Command,
) {
    log::info!("Command {command:?}");
    match command {
        Command::SaveSettings {
            max_current,
            target_soc,
        } => {
            let limits = charger.limits();
            let settings = charger
                .settings()
                .with_request(max_current, target_soc, &limits);
            log_error!("Save settings", settings_store.save(&settings));
            charger.apply_settings(settings);
        }
        other => charger.handle_command(other),
    }
}

fn publish(snapshot_tx: &SnapshotTx, snapshot: SessionSnapshot) -> Result<(), ChargerError> {
    snapshot_tx
        .send(snapshot)
        .map_err(|_| ChargerError::ChannelClosed("snapshot"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        charger::{mock::*, state::ChargerState},
        data_io::settings::Settings,
        statics,
    };
    use tes_0d02::{RawFrame, VehicleUpdate};

    #[derive(Default)]
    struct MemoryStore {
        saved: Vec<Settings>,
    }

    impl SettingsStore for MemoryStore {
        fn load(&mut self) -> Settings {
            self.saved.last().copied().unwrap_or_default()
        }
        fn save(&mut self, settings: &Settings) -> Result<(), ChargerError> {
            self.saved.push(*settings);
            Ok(())
        }
    }

    #[test]
    fn save_settings_clamped_and_applied() {
        let mut charger = charger();
        let mut store = MemoryStore::default();
        apply_command(
            &mut charger,
            &mut store,
            Command::SaveSettings {
                max_current: 50_000,
                target_soc: 80,
            },
        );
        assert_eq!(store.saved.len(), 1);
        assert_eq!(store.saved[0].max_current, 1000);
        assert_eq!(store.saved[0].target_soc, 80);
        assert_eq!(charger.settings(), store.saved[0]);
        assert_eq!(charger.outgoing().status.available_current, 1000);
    }

    #[tokio::test]
    async fn runs_until_quit() {
        let store = SessionStore::new(Duration::from_millis(15));
        let (command_tx, command_rx) = statics::command_channel();
        let (snapshot_tx, mut snapshot_rx) = statics::snapshot_channel();
        let sink: Vec<RawFrame> = Vec::new();

        let ready = ready_vehicle();
        for update in [
            VehicleUpdate::Status(ready.status),
            VehicleUpdate::Emergency(ready.emergency),
        ] {
            store.write_vehicle_update(update).await;
        }

        let task = tokio::spawn(control_task(
            charger(),
            MemoryStore::default(),
            store.clone(),
            command_rx,
            sink,
            snapshot_tx,
            Duration::from_millis(20),
        ));
        command_tx.send(Command::Start).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        snapshot_rx.changed().await.unwrap();
        assert_eq!(snapshot_rx.borrow().state, ChargerState::DcCurrentOutput);
        assert!(store.read_charger_outgoing().await.unwrap().transmit);

        command_tx.send(Command::Quit).await.unwrap();
        task.await.unwrap().unwrap();
        assert!(!store.read_charger_outgoing().await.unwrap().transmit);
    }
}
