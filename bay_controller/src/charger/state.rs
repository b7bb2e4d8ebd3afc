use serde::Serialize;

/// Handshake window for vehicle charge permission
pub const PARAM_EXCHANGE_TIMEOUT_MS: u32 = 15_000;
/// CP ON and permission must be present within this time of pre-charge entry
pub const PRECHARGE_TIMEOUT_MS: u32 = 20_000;
pub const CONTACTOR_WAIT_TIMEOUT_MS: u32 = 10_000;
/// Settle time between vehicle contactor closed and our relay closing
pub const CONTACTOR_SETTLE_MS: u32 = 250;
/// Delay after our relay opened before the final vehicle checks
pub const RELAY_OPEN_DELAY_MS: u32 = 250;
pub const ENDING_TIMEOUT_MS: u32 = 10_000;
pub const FAULT_DWELL_MS: u32 = 10_000;
pub const EMERGENCY_DWELL_MS: u32 = 5_000;
/// Output current below which the relay is considered unloaded, amps
pub const RELAY_OPEN_CURRENT_A: f32 = 1.0;

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ChargerState {
    #[default]
    Idle,
    InitialParamExchange,
    PreChargeOperations,
    DcCurrentOutput,
    EndingChargeProcess,
    FaultHandling,
    EmergencyStopProc,
    Finalization,
}

impl ChargerState {
    /// States in which 0x508/0x509/0x5F8 are broadcast
    pub fn transmits(&self) -> bool {
        matches!(
            self,
            ChargerState::InitialParamExchange
                | ChargerState::PreChargeOperations
                | ChargerState::DcCurrentOutput
                | ChargerState::EndingChargeProcess
        )
    }
}

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PreChargeStep {
    #[default]
    Init,
    VehicleContactorWait,
    RelayCloseDelay,
    Complete,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCategory {
    Protocol,
    Hardware,
    VehicleReported,
    Safety,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReason {
    ParamExchangeTimeout,
    BatteryIncompatible,
    PreChargeTimeout,
    ContactorWaitTimeout,
    /// Output relay did not report closed
    RelayFeedback,
    CpLost,
    VehicleFault(u8),
    EmergencyInput,
    VehicleEmergency,
}

impl FaultReason {
    pub fn category(&self) -> FaultCategory {
        use FaultReason::*;
        match self {
            ParamExchangeTimeout | BatteryIncompatible | PreChargeTimeout | ContactorWaitTimeout => {
                FaultCategory::Protocol
            }
            RelayFeedback | CpLost => FaultCategory::Hardware,
            VehicleFault(_) => FaultCategory::VehicleReported,
            EmergencyInput | VehicleEmergency => FaultCategory::Safety,
        }
    }
}

impl std::fmt::Display for FaultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use FaultReason::*;
        match self {
            ParamExchangeTimeout => write!(f, "Timeout in initial parameter exchange"),
            BatteryIncompatible => write!(f, "Battery incompatible"),
            PreChargeTimeout => write!(f, "Timeout in pre-charge, CP or permission not ready"),
            ContactorWaitTimeout => write!(f, "Timeout waiting for vehicle contactor"),
            RelayFeedback => write!(f, "Charger relay failed to close, inspection required"),
            CpLost => write!(f, "CP signal lost during charging"),
            VehicleFault(flags) => write!(f, "Fault reported by vehicle {flags:#04x}"),
            EmergencyInput => write!(f, "Emergency stop input"),
            VehicleEmergency => write!(f, "Emergency stop from vehicle"),
        }
    }
}

/// Why a session ended without a fault
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PermissionRevoked,
    VehicleStopRequest,
    UserStop,
    RemoteStop,
    TargetSoc,
    VoltageLimit,
    ChargeTime,
}

/// Front panel indicator
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    #[default]
    Standby,
    Charging,
    Complete,
    Fault,
}
