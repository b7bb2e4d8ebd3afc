use super::{
    cp::{CpMonitor, CpState},
    state::*,
    timer::{ChargeTimer, Millis},
};
use crate::{
    data_io::{
        config::{AppConfig, CpConfig, LimitsConfig},
        settings::Settings,
    },
    global_state::Command,
    hal::{Button, Hal},
    log_error,
    power_link::PowerLink,
};
use serde::Serialize;
use tes_0d02::*;
use tokio::sync::mpsc;

/// Where frames that must go out immediately are handed to
pub trait FrameSink {
    fn send(&mut self, frame: RawFrame);
}

impl FrameSink for Vec<RawFrame> {
    fn send(&mut self, frame: RawFrame) {
        self.push(frame)
    }
}

impl FrameSink for mpsc::Sender<RawFrame> {
    fn send(&mut self, frame: RawFrame) {
        if let Err(e) = self.try_send(frame) {
            // the periodic broadcast carries the same data
            log::warn!("Immediate {:#05x} dropped {e}", frame.0);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    pub cp: CpConfig,
    pub limits: LimitsConfig,
    pub cp_read_interval_ms: u32,
    pub manufacturer_id: u16,
    pub sequence: u8,
}

impl From<&AppConfig> for MachineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            cp: config.cp,
            limits: config.limits,
            cp_read_interval_ms: config.timing.cp_read_interval_ms,
            manufacturer_id: config.charger.manufacturer_id,
            sequence: config.charger.sequence,
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime of the current session, reset on entering Idle except the latches
#[derive(Debug, Default, Clone, Copy)]
struct Session {
    state: ChargerState,
    step: PreChargeStep,
    fault_latched: bool,
    complete_latched: bool,
    fault: Option<FaultReason>,
    stop: Option<StopReason>,
    /// Entry time of the current state
    entered: Millis,
    /// Entry time of the current pre-charge step
    step_entered: Millis,
    contactor_closed_at: Option<Millis>,
    relay_open_at: Option<Millis>,
    timer: ChargeTimer,
    measured_voltage: f32,
    measured_current: f32,
    commanded_current: f32,
    /// Last nonzero current request, 0.1 A
    last_requested_current: u16,
    last_vehicle_faults: VehicleFaults,
    vehicle_ready: bool,
    insulation_ok: bool,
    relay_closed: bool,
    lock_engaged: bool,
    vp_relay_on: bool,
    start_requested: bool,
    stop_requested: bool,
    welding_reported: bool,
}

/// Read only view of the session for display and reporting
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    pub state: ChargerState,
    pub step: PreChargeStep,
    pub state_age_ms: u32,
    pub step_age_ms: u32,
    pub cp: CpState,
    pub cp_voltage: f32,
    pub soc: u8,
    pub measured_voltage: f32,
    pub measured_current: f32,
    pub commanded_current: f32,
    pub requested_current: f32,
    pub timer_running: bool,
    pub elapsed_s: u32,
    pub total_s: u32,
    pub remaining_s: u32,
    pub fault_latched: bool,
    pub complete_latched: bool,
    pub fault: Option<FaultReason>,
    pub fault_category: Option<FaultCategory>,
    pub stop: Option<StopReason>,
    pub vehicle_faults: u8,
    pub charger_faults: u8,
    pub indicator: IndicatorState,
    pub relay_closed: bool,
    pub lock_engaged: bool,
    pub vp_relay_on: bool,
    pub settings: Settings,
    pub power_link: bool,
}

pub struct Charger<H: Hal> {
    hal: H,
    power: Option<Box<dyn PowerLink + Send>>,
    config: MachineConfig,
    settings: Settings,
    cp: CpMonitor,
    vehicle: VehicleData,
    outgoing: ChargerOutgoing,
    session: Session,
    now: Millis,
    last_cp_read: Option<Millis>,
}

impl<H: Hal> Charger<H> {
    pub fn new(
        hal: H,
        power: Option<Box<dyn PowerLink + Send>>,
        config: MachineConfig,
        settings: Settings,
    ) -> Self {
        let mut charger = Self {
            hal,
            power,
            config,
            settings,
            cp: CpMonitor::new(config.cp),
            vehicle: VehicleData::default(),
            outgoing: ChargerOutgoing::default(),
            session: Session::default(),
            now: Millis(0),
            last_cp_read: None,
        };
        charger.outgoing.status.status = ChargerStatusFlags::STOP_CONTROL;
        charger.outgoing.params.sequence = config.sequence;
        charger.outgoing.emergency.manufacturer_id = config.manufacturer_id;
        charger.apply_settings(settings);
        charger.outputs_off();
        charger
    }

    /// New limits, also advertised in 0x508/0x509
    pub fn apply_settings(&mut self, settings: Settings) {
        self.settings = settings;
        let status = &mut self.outgoing.status;
        status.available_voltage = settings.max_voltage;
        status.available_current = settings.max_current;
        status.fault_voltage_limit = settings.max_voltage;
        self.outgoing.params.rated_power = rated_power(settings.max_voltage, settings.max_current);
        log::info!(
            "Limits {:.1}V {:.1}A target {}%",
            settings.max_voltage_v(),
            settings.max_current_a(),
            settings.target_soc
        );
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn limits(&self) -> LimitsConfig {
        self.config.limits
    }

    pub fn state(&self) -> ChargerState {
        self.session.state
    }

    pub fn outgoing(&self) -> ChargerOutgoing {
        self.outgoing
    }

    #[cfg(test)]
    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn request_start(&mut self) {
        match self.session.state {
            ChargerState::Idle => self.session.start_requested = true,
            state => log::warn!("Start ignored in {state:?}"),
        }
    }

    pub fn request_stop(&mut self) {
        match self.session.state {
            ChargerState::InitialParamExchange
            | ChargerState::PreChargeOperations
            | ChargerState::DcCurrentOutput => self.session.stop_requested = true,
            state => log::debug!("Stop ignored in {state:?}"),
        }
    }

    /// Start and Stop only. Settings and Quit need the control task.
    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.request_start(),
            Command::Stop => self.request_stop(),
            other => log::warn!("{other:?} not handled by the state machine"),
        }
    }

    /// One control period. `vehicle` is None when the store could not be read,
    /// the previous snapshot is used instead.
    pub fn tick(&mut self, now: Millis, vehicle: Option<VehicleData>, sink: &mut dyn FrameSink) {
        self.now = now;
        if let Some(vehicle) = vehicle {
            self.vehicle = vehicle;
        }
        self.periodic();

        if self.session.state != ChargerState::EmergencyStopProc {
            if let Some(reason) = self.emergency_asserted() {
                self.emergency_stop(reason, sink);
                self.refresh_outgoing();
                return;
            }
        }

        match self.session.state {
            ChargerState::Idle => self.idle(),
            ChargerState::InitialParamExchange => self.initial_param_exchange(),
            ChargerState::PreChargeOperations => self.pre_charge(sink),
            ChargerState::DcCurrentOutput => {
                let target = self.requested_current();
                self.output_control(target);
                self.monitoring();
            }
            ChargerState::EndingChargeProcess => self.ending(),
            ChargerState::FaultHandling => self.fault_handling(),
            ChargerState::EmergencyStopProc => self.emergency_dwell(),
            ChargerState::Finalization => self.finalization(),
        }

        self.relay_interlock();
        self.refresh_outgoing();
    }

    /// Opens every output, used on shutdown
    pub fn shutdown(&mut self) {
        log::warn!("Shutdown from {:?}", self.session.state);
        self.session.timer.stop();
        self.safe_current();
        self.outputs_off();
        self.outgoing.transmit = false;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = &self.session;
        SessionSnapshot {
            state: s.state,
            step: s.step,
            state_age_ms: self.elapsed(),
            step_age_ms: self.step_elapsed(),
            cp: self.cp.state(),
            cp_voltage: self.cp.voltage(),
            soc: self.vehicle.params.soc,
            measured_voltage: s.measured_voltage,
            measured_current: s.measured_current,
            commanded_current: s.commanded_current,
            requested_current: f32::from(s.last_requested_current) / 10.0,
            timer_running: s.timer.running(),
            elapsed_s: s.timer.elapsed_s(),
            total_s: s.timer.total_s(),
            remaining_s: s.timer.remaining_s(),
            fault_latched: s.fault_latched,
            complete_latched: s.complete_latched,
            fault: s.fault,
            fault_category: s.fault.map(|f| f.category()),
            stop: s.stop,
            vehicle_faults: s.last_vehicle_faults.bits(),
            charger_faults: self.outgoing.status.faults.bits(),
            indicator: self.indicator(),
            relay_closed: s.relay_closed,
            lock_engaged: s.lock_engaged,
            vp_relay_on: s.vp_relay_on,
            settings: self.settings,
            power_link: self.power_connected(),
        }
    }

    pub fn indicator(&self) -> IndicatorState {
        if self.session.fault_latched {
            IndicatorState::Fault
        } else if self.session.complete_latched {
            IndicatorState::Complete
        } else if self.session.state == ChargerState::DcCurrentOutput {
            IndicatorState::Charging
        } else {
            IndicatorState::Standby
        }
    }

    fn elapsed(&self) -> u32 {
        self.now.since(self.session.entered)
    }

    fn step_elapsed(&self) -> u32 {
        self.now.since(self.session.step_entered)
    }

    fn enter(&mut self, state: ChargerState) {
        log::info!("{:?} -> {state:?}", self.session.state);
        self.session.state = state;
        self.session.entered = self.now;
        self.session.step_entered = self.now;
    }

    /// Restarts the step timer only, the 20 s pre-charge gate keeps running
    /// from the state entry
    fn enter_step(&mut self, step: PreChargeStep) {
        log::debug!("Pre-charge {:?} -> {step:?}", self.session.step);
        self.session.step = step;
        self.session.step_entered = self.now;
    }

    fn enter_idle(&mut self) {
        let Session {
            fault_latched,
            complete_latched,
            fault,
            stop,
            last_vehicle_faults,
            ..
        } = self.session;
        self.enter(ChargerState::Idle);
        self.session = Session {
            state: ChargerState::Idle,
            entered: self.now,
            step_entered: self.now,
            fault_latched,
            complete_latched,
            fault,
            stop,
            last_vehicle_faults,
            ..Session::default()
        };
    }

    fn periodic(&mut self) {
        if self.vehicle.status.charge_permitted()
            && !self.session.vehicle_ready
            && self.session.state == ChargerState::InitialParamExchange
        {
            log::info!("Vehicle CAN permission granted");
            self.session.vehicle_ready = true;
        }
        let welding = self.vehicle.emergency.welding_detected();
        if welding && !self.session.welding_reported {
            log::error!("Vehicle reports contactor welding detection error");
        }
        self.session.welding_reported = welding;

        self.session.timer.set_limit(self.vehicle.params.max_charge_time);
        self.session.timer.update(self.now);

        let due = self
            .last_cp_read
            .map_or(true, |last| self.now.since(last) >= self.config.cp_read_interval_ms);
        if due {
            self.last_cp_read = Some(self.now);
            self.cp.sample(&mut self.hal);
        }
    }

    /// The hardware input counts in every state. A stale 0x5F0 left over from
    /// the last vehicle is ignored while Idle.
    fn emergency_asserted(&mut self) -> Option<FaultReason> {
        if self.hal.read_button(Button::Emergency) {
            Some(FaultReason::EmergencyInput)
        } else if self.vehicle.emergency.emergency_stop() && self.session.state != ChargerState::Idle
        {
            Some(FaultReason::VehicleEmergency)
        } else {
            None
        }
    }

    fn emergency_stop(&mut self, reason: FaultReason, sink: &mut dyn FrameSink) {
        log::error!("Emergency stop procedure: {reason}");
        self.session.fault_latched = true;
        self.session.fault = Some(reason);
        self.session.timer.stop();
        self.outputs_off();
        self.safe_current();

        self.outgoing.status.faults |= ChargerFaults::SYSTEM_ERROR;
        self.outgoing.status.status |= ChargerStatusFlags::STOP_CONTROL;
        self.outgoing.emergency.flags |= ChargerEmergencyFlags::EMERGENCY_STOP;
        sink.send(self.outgoing.status.to_raw());
        sink.send(self.outgoing.emergency.to_raw());

        self.enter(ChargerState::EmergencyStopProc);
    }

    fn idle(&mut self) {
        self.outgoing.status.status = ChargerStatusFlags::empty();
        self.outputs_off();
        self.session.vehicle_ready = false;
        self.session.insulation_ok = false;
        self.session.stop_requested = false;
        self.session.timer.stop();
        self.session.step = PreChargeStep::Init;

        let start = std::mem::take(&mut self.session.start_requested)
            || self.hal.read_button(Button::Start);
        if !start {
            return;
        }
        self.session.fault_latched = false;
        self.session.complete_latched = false;
        self.session.fault = None;
        self.session.stop = None;
        self.set_vp_relay(true);
        self.last_cp_read = Some(self.now);
        match self.cp.sample(&mut self.hal) {
            CpState::Off | CpState::On => {
                log::info!("Start requested");
                self.enter(ChargerState::InitialParamExchange);
            }
            cp => log::warn!("Start requested but CP is {cp:?}, cannot start"),
        }
    }

    fn initial_param_exchange(&mut self) {
        if self.stop_before_power() {
            return;
        }
        if self.session.vehicle_ready {
            if self.battery_compatible() {
                log::info!(
                    "Battery compatible, fault detection limit {}",
                    self.outgoing.status.fault_voltage_limit
                );
                self.enter(ChargerState::PreChargeOperations);
            } else {
                self.outgoing.status.faults |= ChargerFaults::BATTERY_INCOMPATIBLE;
                self.enter_fault(FaultReason::BatteryIncompatible);
            }
        } else if self.elapsed() > PARAM_EXCHANGE_TIMEOUT_MS {
            self.outgoing.status.faults |= ChargerFaults::SYSTEM_ERROR;
            self.enter_fault(FaultReason::ParamExchangeTimeout);
        }
    }

    fn battery_compatible(&mut self) -> bool {
        let status = self.vehicle.status;
        let charger_max = self.settings.max_voltage;
        if status.voltage_limit > charger_max {
            log::error!(
                "Vehicle voltage limit {} above charger max {charger_max}",
                status.voltage_limit
            );
            return false;
        }
        if status.max_voltage > 0 && status.voltage_limit > status.max_voltage {
            log::error!(
                "Vehicle voltage limit {} above its own max {}",
                status.voltage_limit,
                status.max_voltage
            );
            return false;
        }
        let limit = match status.max_voltage {
            0 => charger_max,
            vehicle_max => vehicle_max.min(charger_max),
        };
        self.outgoing.status.fault_voltage_limit = limit;
        if let Some(power) = self.power.as_mut().filter(|p| p.connected()) {
            power.set_voltage(f32::from(limit) / 10.0);
        }
        true
    }

    /// Stop requests before the output relay has closed end the session
    /// without a fault
    fn stop_before_power(&mut self) -> bool {
        let reason = if std::mem::take(&mut self.session.stop_requested) {
            Some(StopReason::RemoteStop)
        } else if self.hal.read_button(Button::Stop) {
            Some(StopReason::UserStop)
        } else if self.vehicle.status.stop_requested() {
            Some(StopReason::VehicleStopRequest)
        } else {
            None
        };
        match reason {
            Some(reason) => {
                self.end_normal(reason);
                true
            }
            None => false,
        }
    }

    fn pre_charge(&mut self, sink: &mut dyn FrameSink) {
        if matches!(
            self.session.step,
            PreChargeStep::Init
                | PreChargeStep::VehicleContactorWait
                | PreChargeStep::RelayCloseDelay
        ) && self.stop_before_power()
        {
            return;
        }
        if !(self.cp.state() == CpState::On && self.vehicle.status.charge_permitted()) {
            if self.elapsed() > PRECHARGE_TIMEOUT_MS {
                self.outgoing.status.faults |= ChargerFaults::SYSTEM_ERROR;
                self.enter_fault(FaultReason::PreChargeTimeout);
            }
            return;
        }

        match self.session.step {
            PreChargeStep::Init => {
                self.set_lock(true);
                if self.insulation_diagnosis() {
                    log::info!("Pre-charge checks OK, announcing ready");
                    let status = &mut self.outgoing.status.status;
                    status.remove(ChargerStatusFlags::STOP_CONTROL);
                    status.insert(ChargerStatusFlags::CONNECTOR_LOCK);
                    sink.send(self.outgoing.status.to_raw());
                    self.enter_step(PreChargeStep::VehicleContactorWait);
                }
            }
            PreChargeStep::VehicleContactorWait => {
                if !self.vehicle.status.contactor_open() {
                    let closed_at = *self.session.contactor_closed_at.get_or_insert_with(|| {
                        log::info!("Vehicle contactor closed, settling");
                        self.now
                    });
                    if self.now.since(closed_at) >= CONTACTOR_SETTLE_MS {
                        self.enter_step(PreChargeStep::RelayCloseDelay);
                    }
                } else if self.step_elapsed() > CONTACTOR_WAIT_TIMEOUT_MS {
                    self.outgoing.status.faults |= ChargerFaults::SYSTEM_ERROR;
                    self.enter_fault(FaultReason::ContactorWaitTimeout);
                }
            }
            PreChargeStep::RelayCloseDelay => {
                log::info!("Closing charger relay");
                self.set_relay(true);
                match self.hal.relay_feedback() {
                    Ok(true) => {
                        self.outgoing.status.status |= ChargerStatusFlags::OPERATING;
                        sink.send(self.outgoing.status.to_raw());
                        self.enter_step(PreChargeStep::Complete);
                    }
                    feedback => {
                        log::error!("Relay feedback {feedback:?} after close command");
                        self.outgoing.status.faults |= ChargerFaults::INTERNAL_ERROR;
                        self.enter_fault(FaultReason::RelayFeedback);
                    }
                }
            }
            PreChargeStep::Complete => {
                log::info!("Pre-charge complete");
                self.session.contactor_closed_at = None;
                self.session.timer.start(self.now);
                self.enter(ChargerState::DcCurrentOutput);
            }
        }
    }

    /// Always passes. A real insulation resistance test has to replace this
    /// before the charger is used on a vehicle.
    fn insulation_diagnosis(&mut self) -> bool {
        if !self.session.insulation_ok {
            log::warn!("Insulation diagnosis not implemented, skipped");
        }
        self.session.insulation_ok = true;
        true
    }

    /// Current the vehicle asks for capped by the charger limit, amps
    fn requested_current(&mut self) -> f32 {
        let request = self.vehicle.status.current_request;
        if request > 0 {
            self.session.last_requested_current = request;
        }
        f32::from(request.min(self.settings.max_current)) / 10.0
    }

    fn output_control(&mut self, amps: f32) {
        self.session.commanded_current = amps;
        if let Some(power) = self.power.as_mut().filter(|p| p.connected()) {
            power.set_current(amps);
            self.session.measured_voltage = power.voltage();
            self.session.measured_current = power.current();
            return;
        }
        match self.hal.read_output_voltage() {
            Ok(volts) => self.session.measured_voltage = volts,
            Err(e) => log::warn!("Output voltage read {e}"),
        }
        // no supply to ask, assume it delivers its rating
        self.session.measured_current = match self.session.relay_closed {
            true => self.settings.max_current_a(),
            false => 0.0,
        };
    }

    fn monitoring(&mut self) {
        let status = self.vehicle.status;
        if !status.charge_permitted() {
            return self.end_normal(StopReason::PermissionRevoked);
        }
        if self.hal.read_button(Button::Stop) {
            return self.end_normal(StopReason::UserStop);
        }
        if std::mem::take(&mut self.session.stop_requested) {
            return self.end_normal(StopReason::RemoteStop);
        }
        if self.vehicle.params.soc >= self.settings.target_soc {
            return self.end_normal(StopReason::TargetSoc);
        }
        let limit = f32::from(status.voltage_limit) / 10.0;
        if self.elapsed() >= self.config.limits.settle_ms
            && status.voltage_limit > 0
            && self.session.measured_voltage >= limit + self.config.limits.voltage_tolerance
        {
            log::warn!(
                "Output {:.1}V at vehicle limit {limit:.1}V",
                self.session.measured_voltage
            );
            return self.end_normal(StopReason::VoltageLimit);
        }
        if self.session.timer.expired() {
            return self.end_normal(StopReason::ChargeTime);
        }
        if status.fault() {
            self.session.last_vehicle_faults = status.faults;
            return self.enter_fault(FaultReason::VehicleFault(status.faults.bits()));
        }
        if self.cp.state() != CpState::On {
            self.outgoing.status.faults |= ChargerFaults::SYSTEM_ERROR;
            self.enter_fault(FaultReason::CpLost);
        }
    }

    fn end_normal(&mut self, reason: StopReason) {
        log::info!("Charging stopped: {reason:?}");
        self.session.timer.stop();
        self.session.complete_latched = true;
        self.session.stop = Some(reason);
        self.safe_current();
        self.enter(ChargerState::EndingChargeProcess);
    }

    fn enter_fault(&mut self, reason: FaultReason) {
        log::error!("Fault: {reason}");
        self.session.fault_latched = true;
        self.session.fault = Some(reason);
        self.session.timer.stop();
        self.set_relay(false);
        self.set_lock(false);
        self.safe_current();
        self.enter(ChargerState::FaultHandling);
    }

    fn ending(&mut self) {
        self.output_control(0.0);
        if self.session.relay_closed {
            self.set_relay(false);
            log::info!("Charger relay opened");
        }
        let relay_open = matches!(self.hal.relay_feedback(), Ok(false));
        if relay_open
            && self.session.relay_open_at.is_none()
            && self.session.measured_current < RELAY_OPEN_CURRENT_A
        {
            self.session.relay_open_at = Some(self.now);
        }

        if let Some(open_at) = self.session.relay_open_at {
            if self.now.since(open_at) >= RELAY_OPEN_DELAY_MS {
                self.stopped_status();
                if self.vehicle.status.contactor_open() && self.cp.state() == CpState::Off {
                    log::info!("Vehicle released, unlocking coupler");
                    self.unlock_and_finalize();
                    return;
                }
            }
        }
        if self.elapsed() > ENDING_TIMEOUT_MS {
            log::warn!("Timeout waiting for vehicle to disconnect, forcing unlock");
            self.stopped_status();
            self.unlock_and_finalize();
        }
    }

    fn stopped_status(&mut self) {
        let status = &mut self.outgoing.status.status;
        status.insert(ChargerStatusFlags::STOP_CONTROL);
        status.remove(ChargerStatusFlags::OPERATING);
    }

    fn unlock_and_finalize(&mut self) {
        self.set_lock(false);
        self.outgoing.status.status.remove(ChargerStatusFlags::CONNECTOR_LOCK);
        self.session.relay_open_at = None;
        self.enter(ChargerState::Finalization);
    }

    fn fault_handling(&mut self) {
        self.set_relay(false);
        self.set_lock(false);
        if self.elapsed() > FAULT_DWELL_MS {
            log::info!("Fault dwell over");
            self.outgoing.status.faults = ChargerFaults::empty();
            self.enter_idle();
        }
    }

    fn emergency_dwell(&mut self) {
        if self.elapsed() > EMERGENCY_DWELL_MS {
            log::info!("Emergency stop processed");
            self.outgoing.status.faults = ChargerFaults::empty();
            self.outgoing.emergency.flags = ChargerEmergencyFlags::empty();
            self.enter_idle();
        }
    }

    fn finalization(&mut self) {
        match self.hal.read_output_voltage() {
            Ok(volts) => {
                self.session.measured_voltage = volts;
                if volts > self.config.limits.residual_voltage {
                    log::warn!("Output still at {volts:.1}V after finalization");
                }
            }
            Err(e) => log::warn!("Output voltage read {e}"),
        }
        log::info!("Charge finalized");
        self.enter_idle();
    }

    fn relay_interlock(&mut self) {
        if self.session.relay_closed && self.cp.state() != CpState::On {
            log::error!("Relay closed with CP {:?}, opening", self.cp.state());
            self.set_relay(false);
        }
    }

    fn refresh_outgoing(&mut self) {
        let params = &mut self.outgoing.params;
        params.output_voltage = (self.session.measured_voltage * 10.0) as u16;
        params.output_current = (self.session.measured_current * 10.0) as u16;
        params.remaining_time = self.session.timer.remaining_minutes();
        self.outgoing.transmit = self.session.state.transmits();
    }

    fn power_connected(&self) -> bool {
        self.power.as_ref().map_or(false, |p| p.connected())
    }

    fn safe_current(&mut self) {
        let amps = self.config.limits.safe_current;
        self.session.commanded_current = amps;
        if let Some(power) = self.power.as_mut().filter(|p| p.connected()) {
            power.set_current(amps);
        }
    }

    fn outputs_off(&mut self) {
        self.set_relay(false);
        self.set_lock(false);
        self.set_vp_relay(false);
    }

    fn set_relay(&mut self, closed: bool) {
        log_error!("Relay", self.hal.set_relay(closed));
        self.session.relay_closed = closed;
    }

    fn set_lock(&mut self, locked: bool) {
        log_error!("Coupler lock", self.hal.set_lock(locked));
        self.session.lock_engaged = locked;
    }

    fn set_vp_relay(&mut self, on: bool) {
        log_error!("VP relay", self.hal.set_vp_relay(on));
        self.session.vp_relay_on = on;
    }
}
