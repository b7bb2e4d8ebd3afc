use crate::{
    data_io::config::BusConfig,
    error::ChargerError,
    global_state::{Command, SessionStore},
    log_error,
    statics::{CommandTx, RawFrameRx},
};
use std::time::Duration;
use tes_0d02::{decode, RawFrame};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_socketcan::{CANFrame, CANSocket};

trait FrameWriter {
    async fn write(&mut self, raw: RawFrame) -> Result<(), ChargerError>;
}

impl FrameWriter for CANSocket {
    async fn write(&mut self, raw: RawFrame) -> Result<(), ChargerError> {
        let frame = build_frame(raw)?;
        log::trace!(">> {:02x}: {:02x?}", frame.id(), frame.data());
        self.write_frame(frame)
            .map_err(|_| ChargerError::CanTx(raw.0))?
            .await
            .map_err(|e| ChargerError::CanBusWrite(raw.0, e))
    }
}

/// Bus task: merges received vehicle frames into the store, sends frames the
/// control task asks for immediately, and broadcasts 0x508/0x509/0x5F8 every
/// `tx_interval_ms` while the outgoing block says so. Write errors are logged
/// and the task carries on; it only fails when the socket cannot be opened or
/// the receive stream ends.
pub async fn can_task(
    config: BusConfig,
    store: SessionStore,
    mut immediate_rx: RawFrameRx,
) -> Result<(), ChargerError> {
    use futures_util::StreamExt;

    log::info!("Starting CAN thread {} on {}", tokio::task::id(), config.interface);
    let mut can = CANSocket::open(&config.interface).map_err(ChargerError::CanOpen)?;
    let mut broadcast = interval(Duration::from_millis(config.tx_interval_ms));
    broadcast.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            rx = can.next() => match rx {
                Some(Ok(frame)) => {
                    log::trace!("<< {:02x}: {:02x?}", frame.id(), frame.data());
                    received(&store, frame.id(), frame.data()).await;
                }
                Some(Err(e)) => log::warn!("CAN rx {e:?}"),
                None => {
                    log::error!("CAN stream ended");
                    return Err(ChargerError::ChannelClosed("can rx"));
                }
            },
            immediate = immediate_rx.recv() => match immediate {
                Some(raw) => {
                    transmit(&mut can, [raw]).await;
                }
                None => {
                    log::info!("Control task gone, CAN thread exiting");
                    return Ok(());
                }
            },
            _ = broadcast.tick() => {
                let Some(outgoing) = store.read_charger_outgoing().await else {
                    continue;
                };
                if !outgoing.transmit {
                    continue;
                }
                transmit(&mut can, outgoing.tx_frames()).await;
            }
        }
    }
}

/// Decodes one received frame into the store. Unknown ids and short frames
/// are dropped, so is the update when the store is busy.
pub async fn received(store: &SessionStore, id: u32, data: &[u8]) -> bool {
    let Some(update) = decode(id, data) else {
        return false;
    };
    if !store.write_vehicle_update(update).await {
        log::debug!("{id:02x} update dropped");
        return false;
    }
    true
}

pub fn build_frame((id, data): RawFrame) -> Result<CANFrame, ChargerError> {
    CANFrame::new(id, &data, false, false).map_err(|_| ChargerError::FrameBuild(id))
}

/// Writes every frame, a failed write does not hold back the ones after it.
/// Returns the number of failed writes.
async fn transmit<W: FrameWriter>(
    bus: &mut W,
    frames: impl IntoIterator<Item = RawFrame>,
) -> usize {
    let mut failed = 0;
    for raw in frames {
        if let Err(e) = bus.write(raw).await {
            log::warn!("CAN tx {e}");
            failed += 1;
        }
    }
    failed
}

/// Waits on the bus task. If it fails or panics the control task is told to
/// quit, which opens every output before it returns.
pub async fn supervise(task: JoinHandle<Result<(), ChargerError>>, command_tx: CommandTx) {
    match task.await {
        Ok(Ok(())) => {
            log::info!("CAN thread finished");
            return;
        }
        Ok(Err(e)) => log::error!("CAN thread failed {e}"),
        Err(e) => log::error!("CAN thread died {e}"),
    }
    log::warn!("No bus, shutting down");
    log_error!(
        "Quit",
        command_tx
            .send(Command::Quit)
            .await
            .map_err(|_| ChargerError::ChannelClosed("command"))
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::statics::command_channel;
    use tes_0d02::{ChargerOutgoing, ChargerStatus, Message, VehicleErrorFlags};

    /// Records written frames, refuses the ids in `refuse`
    #[derive(Default)]
    struct TestBus {
        written: Vec<u32>,
        refuse: Vec<u32>,
    }

    impl FrameWriter for TestBus {
        async fn write(&mut self, raw: RawFrame) -> Result<(), ChargerError> {
            if self.refuse.contains(&raw.0) {
                return Err(ChargerError::CanTx(raw.0));
            }
            self.written.push(raw.0);
            Ok(())
        }
    }

    #[test]
    fn outgoing_frame() {
        let mut status = ChargerStatus::default();
        status.available_voltage = 1000;
        let frame = build_frame(status.to_raw()).unwrap();
        assert_eq!(frame.id(), 0x508);
        assert_eq!(frame.data().len(), 8);
        assert_eq!(&frame.data()[2..4], &[0xE8, 0x03]);
        assert!(!frame.is_extended());
    }

    #[tokio::test]
    async fn received_frames() {
        let store = SessionStore::new(Duration::from_millis(15));
        assert!(received(&store, 0x5F0, &[0x03]).await);
        assert!(!received(&store, 0x123, &[0xFF; 8]).await);
        assert!(!received(&store, 0x500, &[0x01, 0x01]).await);

        let vehicle = store.read_vehicle_snapshot().await.unwrap();
        assert_eq!(
            vehicle.emergency.flags,
            VehicleErrorFlags::EMERGENCY_STOP | VehicleErrorFlags::WELDING_DETECTION_ERROR
        );
        assert!(!vehicle.status.charge_permitted());
    }

    #[tokio::test]
    async fn write_error_does_not_stop_broadcast() {
        let mut bus = TestBus {
            refuse: vec![0x508],
            ..Default::default()
        };
        let frames = ChargerOutgoing::default().tx_frames();
        assert_eq!(transmit(&mut bus, frames).await, 1);
        assert_eq!(bus.written, vec![0x509, 0x5F8]);

        bus.refuse.clear();
        assert_eq!(transmit(&mut bus, frames).await, 0);
        assert_eq!(bus.written, vec![0x509, 0x5F8, 0x508, 0x509, 0x5F8]);
    }

    #[tokio::test]
    async fn failed_bus_task_quits_control() {
        let (command_tx, mut command_rx) = command_channel();
        let task = tokio::spawn(async { Err(ChargerError::ChannelClosed("can rx")) });
        supervise(task, command_tx).await;
        assert_eq!(command_rx.try_recv().ok(), Some(Command::Quit));

        let (command_tx, mut command_rx) = command_channel();
        let task: JoinHandle<Result<(), ChargerError>> = tokio::spawn(async { panic!("bus") });
        supervise(task, command_tx).await;
        assert_eq!(command_rx.try_recv().ok(), Some(Command::Quit));
    }

    #[tokio::test]
    async fn finished_bus_task_sends_nothing() {
        let (command_tx, mut command_rx) = command_channel();
        let task = tokio::spawn(async { Ok(()) });
        supervise(task, command_tx).await;
        assert!(command_rx.try_recv().is_err());
    }
}
