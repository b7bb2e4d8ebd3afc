use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tes_0d02::{ChargerOutgoing, VehicleData, VehicleUpdate};
use tokio::{
    sync::{Mutex, MutexGuard},
    time::timeout,
};

/// Requests from the front panel or a remote collaborator
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Current limit in 0.1 A, target SOC in %
    SaveSettings { max_current: u16, target_soc: u8 },
    /// Open every output and stop the control task
    Quit,
}

#[derive(Debug, Default, Clone, Copy)]
struct SharedFrames {
    vehicle: VehicleData,
    outgoing: ChargerOutgoing,
}

/// Latest vehicle frames and the charger's outgoing block behind one mutex.
/// The bus task is the only writer of vehicle data and the control task the
/// only writer of outgoing data. Every access gives up after `lock_timeout`,
/// a timeout means "no new information".
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<SharedFrames>>,
    lock_timeout: Duration,
}

impl SessionStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SharedFrames::default())),
            lock_timeout,
        }
    }

    async fn lock(&self, what: &str) -> Option<MutexGuard<'_, SharedFrames>> {
        match timeout(self.lock_timeout, self.inner.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                log::warn!("Store lock timeout on {what}");
                None
            }
        }
    }

    pub async fn read_vehicle_snapshot(&self) -> Option<VehicleData> {
        self.lock("vehicle read").await.map(|frames| frames.vehicle)
    }

    /// false when the update was dropped
    pub async fn write_vehicle_update(&self, update: VehicleUpdate) -> bool {
        match self.lock("vehicle write").await {
            Some(mut frames) => {
                frames.vehicle.apply(update);
                true
            }
            None => false,
        }
    }

    pub async fn read_charger_outgoing(&self) -> Option<ChargerOutgoing> {
        self.lock("outgoing read").await.map(|frames| frames.outgoing)
    }

    /// false when the update was dropped
    pub async fn write_charger_outgoing(&self, outgoing: ChargerOutgoing) -> bool {
        match self.lock("outgoing write").await {
            Some(mut frames) => {
                frames.outgoing = outgoing;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tes_0d02::{decode, VehicleStatusFlags};

    #[tokio::test]
    async fn vehicle_updates_merge() {
        let store = SessionStore::new(Duration::from_millis(15));
        assert!(
            store
                .write_vehicle_update(decode(0x500, &[0, 0x01, 0x64, 0, 0xE8, 0x03, 0xB0, 0x04]).unwrap())
                .await
        );
        assert!(store.write_vehicle_update(decode(0x501, &[1, 55, 0x3C, 0]).unwrap()).await);

        let vehicle = store.read_vehicle_snapshot().await.unwrap();
        assert!(vehicle.status.status.contains(VehicleStatusFlags::CHARGE_PERMISSION));
        assert_eq!(vehicle.status.voltage_limit, 1000);
        assert_eq!(vehicle.params.soc, 55);
        assert_eq!(vehicle.params.max_charge_time, 60);
    }

    #[tokio::test]
    async fn lock_timeout_is_no_information() {
        let store = SessionStore::new(Duration::from_millis(10));
        let mut outgoing = ChargerOutgoing::default();
        outgoing.transmit = true;
        assert!(store.write_charger_outgoing(outgoing).await);

        let held = store.inner.lock().await;
        assert_eq!(store.read_vehicle_snapshot().await, None);
        assert_eq!(store.read_charger_outgoing().await, None);
        assert!(!store.write_charger_outgoing(ChargerOutgoing::default()).await);
        assert!(!store.write_vehicle_update(decode(0x5F0, &[1]).unwrap()).await);
        drop(held);

        // dropped writes left the earlier values in place
        assert_eq!(store.read_charger_outgoing().await, Some(outgoing));
        let vehicle = store.read_vehicle_snapshot().await.unwrap();
        assert!(!vehicle.emergency.emergency_stop());
    }
}
