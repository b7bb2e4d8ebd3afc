use super::{
    parse_reading, set_current_line, set_voltage_line, LineBuffer, PowerLink, SetpointFilter,
};
use crate::{data_io::config::PowerLinkConfig, error::ChargerError, log_error};
use serialport::SerialPort;
use std::{
    io::{ErrorKind, Read, Write},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

const READ_TIMEOUT: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    /// Bumped on every reconnect so the setpoint filters resend
    generation: u32,
    voltage: f32,
    current: f32,
    last_packet: Option<Instant>,
}

/// Handle to the serial power supply thread. Setters only queue a line, the
/// thread owns the port.
pub struct SerialPowerLink {
    state: Arc<Mutex<LinkState>>,
    tx: mpsc::Sender<String>,
    generation: u32,
    voltage_filter: SetpointFilter,
    current_filter: SetpointFilter,
}

impl SerialPowerLink {
    pub fn open(config: &PowerLinkConfig) -> Result<Self, ChargerError> {
        let port = serialport::new(&config.device, config.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        log::info!("Power link on {} @ {}", config.device, config.baud_rate);

        let state = Arc::new(Mutex::new(LinkState::default()));
        let (tx, rx) = mpsc::channel();
        let link_timeout = Duration::from_millis(config.timeout_ms);
        let thread_state = state.clone();
        thread::Builder::new()
            .name("power-link".into())
            .spawn(move || link_thread(port, thread_state, rx, link_timeout))?;

        Ok(Self {
            state,
            tx,
            generation: 0,
            voltage_filter: SetpointFilter::default(),
            current_filter: SetpointFilter::default(),
        })
    }

    fn check_reconnect(&mut self) {
        let generation = match self.state.lock() {
            Ok(state) => state.generation,
            Err(_) => return,
        };
        if generation != self.generation {
            self.generation = generation;
            self.voltage_filter.reset();
            self.current_filter.reset();
        }
    }

    fn send(&self, line: String) {
        log_error!(
            "Power link queue",
            self.tx.send(line).map_err(|_| ChargerError::ChannelClosed("power link"))
        );
    }
}

impl PowerLink for SerialPowerLink {
    fn connected(&self) -> bool {
        self.state.lock().map(|s| s.connected).unwrap_or(false)
    }

    fn set_voltage(&mut self, volts: f32) {
        self.check_reconnect();
        if self.connected() && self.voltage_filter.update(volts) {
            log::debug!("PSC SET V: {volts:.1}");
            self.send(set_voltage_line(volts));
        }
    }

    fn set_current(&mut self, amps: f32) {
        self.check_reconnect();
        if self.connected() && self.current_filter.update(amps) {
            log::debug!("PSC SET I: {amps:.1}");
            self.send(set_current_line(amps));
        }
    }

    fn voltage(&self) -> f32 {
        self.state.lock().map(|s| s.voltage).unwrap_or(0.0)
    }

    fn current(&self) -> f32 {
        self.state.lock().map(|s| s.current).unwrap_or(0.0)
    }
}

fn link_thread(
    mut port: Box<dyn SerialPort>,
    state: Arc<Mutex<LinkState>>,
    rx: mpsc::Receiver<String>,
    link_timeout: Duration,
) {
    let mut lines = LineBuffer::default();
    let mut buf = [0u8; 64];
    loop {
        loop {
            match rx.try_recv() {
                Ok(line) => log_error!("Power link write", port.write_all(line.as_bytes())),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    log::info!("Power link handle dropped, thread exiting");
                    return;
                }
            }
        }

        match port.read(&mut buf) {
            Ok(n) => {
                for line in buf[..n].iter().filter_map(|b| lines.push(*b)) {
                    let Some(reading) = parse_reading(&line) else {
                        continue;
                    };
                    let Ok(mut s) = state.lock() else {
                        return;
                    };
                    s.voltage = reading.voltage;
                    s.current = reading.current;
                    s.last_packet = Some(Instant::now());
                    if !s.connected {
                        log::info!("PSC: Connected");
                        s.connected = true;
                        s.generation = s.generation.wrapping_add(1);
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => (),
            Err(e) => {
                log::error!("Power link read {e:?}");
                thread::sleep(Duration::from_millis(100));
            }
        }

        let Ok(mut s) = state.lock() else {
            return;
        };
        let stale = s.last_packet.map_or(true, |t| t.elapsed() > link_timeout);
        if s.connected && stale {
            log::warn!("PSC: Connection lost");
            s.connected = false;
        }
    }
}
