use crate::{
    charger::{machine::SessionSnapshot, state::ChargerState},
    error::ChargerError,
    statics::SnapshotRx,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

/// One report line: the session snapshot with a wall clock stamp
#[derive(Serialize, Debug)]
pub struct Report<'a> {
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub session: &'a SessionSnapshot,
}

pub fn report_line(snapshot: &SessionSnapshot, time: DateTime<Utc>) -> Result<String, ChargerError> {
    Ok(serde_json::to_string(&Report {
        time,
        session: snapshot,
    })?)
}

/// Logs the session as json every `interval` while a session is running, and
/// once more when it returns to Idle.
pub async fn report_task(
    mut snapshot_rx: SnapshotRx,
    interval: Duration,
) -> Result<(), ChargerError> {
    log::info!("Starting report thread {}", tokio::task::id());
    let mut last_state = ChargerState::Idle;
    loop {
        sleep(interval).await;
        if snapshot_rx.has_changed().is_err() {
            log::info!("Control task gone, report thread exiting");
            return Ok(());
        }
        let snapshot = *snapshot_rx.borrow_and_update();
        if snapshot.state == ChargerState::Idle && last_state == ChargerState::Idle {
            continue;
        }
        last_state = snapshot.state;
        match report_line(&snapshot, Utc::now()) {
            Ok(line) => log::info!("Session: {line}"),
            Err(e) => log::error!("Session report {e}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::statics;
    use chrono::TimeZone;

    #[test]
    fn report_json() {
        let snapshot = SessionSnapshot {
            state: ChargerState::DcCurrentOutput,
            soc: 64,
            ..Default::default()
        };
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let line = report_line(&snapshot, time).unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["time"], "2024-05-01T12:00:00Z");
        assert_eq!(json["state"], "DcCurrentOutput");
        assert_eq!(json["soc"], 64);
        assert_eq!(json["fault"], serde_json::Value::Null);
        assert_eq!(json["settings"]["target_soc"], 100);
    }

    #[tokio::test]
    async fn exits_with_control_task() {
        let (tx, rx) = statics::snapshot_channel();
        let task = tokio::spawn(report_task(rx, Duration::from_millis(5)));
        drop(tx);
        task.await.unwrap().unwrap();
    }
}
