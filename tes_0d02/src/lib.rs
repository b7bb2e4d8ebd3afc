/// Notes from:
/// TES-0D-02-01
/// DC charging protocol for light electric vehicles, 500 kbps CAN, 11-bit identifiers,
/// 8 byte payloads with little-endian 16-bit fields.
///
/// Frames are plain byte arrays here so the codec can be shared by the bus task,
/// the control loop and the tests without a socket.
use bitflags::bitflags;
use serde::Serialize;

/// Remaining charge time sent while the charge timer is not running
pub const REMAINING_TIME_UNKNOWN: u16 = 0xFFFF;
/// Max charge time value meaning "no limit from the BMS"
pub const CHARGE_TIME_UNLIMITED: u16 = 0xFFFF;

/// Identifier and payload of a frame ready for the bus
pub type RawFrame = (u32, [u8; 8]);

pub trait Message: Sized {
    const ID: u32;
    /// Shortest payload the message can be decoded from
    const MIN_LEN: usize;

    fn encode(&self) -> [u8; 8];
    fn decode(data: &[u8]) -> Option<Self>;

    fn to_raw(&self) -> RawFrame {
        (Self::ID, self.encode())
    }
}

bitflags! {
    /// 500.0 - faults reported by the BMS, 1 = error
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct VehicleFaults: u8 {
        const SYSTEM_ERROR = 0x01;
        const OVER_VOLTAGE = 0x02;
        const UNDER_VOLTAGE = 0x04;
        const CURRENT_MISMATCH = 0x08;
        const OVER_TEMPERATURE = 0x10;
        const VOLTAGE_MISMATCH = 0x20;
    }
}

bitflags! {
    /// 500.1
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct VehicleStatusFlags: u8 {
        /// Charging permitted by the vehicle
        const CHARGE_PERMISSION = 0x01;
        /// Vehicle side contactor open
        const CONTACTOR_OPEN = 0x02;
        /// Vehicle not in a chargeable posture (stand / key position)
        const POSTURE = 0x04;
        /// Normal stop request
        const STOP_REQUEST = 0x08;
    }
}

bitflags! {
    /// 5F0.0
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct VehicleErrorFlags: u8 {
        const EMERGENCY_STOP = 0x01;
        const WELDING_DETECTION_ERROR = 0x02;
    }
}

bitflags! {
    /// 508.0
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct ChargerFaults: u8 {
        /// Handshake timeouts, CP loss, emergency stop
        const SYSTEM_ERROR = 0x01;
        /// Charger hardware, e.g. relay feedback
        const INTERNAL_ERROR = 0x02;
        const BATTERY_INCOMPATIBLE = 0x04;
    }
}

bitflags! {
    /// 508.1
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct ChargerStatusFlags: u8 {
        const STOP_CONTROL = 0x01;
        /// Output relay closed, current may flow
        const OPERATING = 0x02;
        const CONNECTOR_LOCK = 0x04;
    }
}

bitflags! {
    /// 5F8.0
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct ChargerEmergencyFlags: u8 {
        const EMERGENCY_STOP = 0x01;
    }
}

macro_rules! empty_default {
    ($($flags:ty),*) => {
        $(
            impl Default for $flags {
                fn default() -> Self {
                    Self::empty()
                }
            }
        )*
    };
}

empty_default!(
    VehicleFaults,
    VehicleStatusFlags,
    VehicleErrorFlags,
    ChargerFaults,
    ChargerStatusFlags,
    ChargerEmergencyFlags
);

impl std::fmt::Display for VehicleStatusFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "500.1.0:{} 1:{} 2:{} 3:{}",
            self.contains(Self::CHARGE_PERMISSION) as u8,
            self.contains(Self::CONTACTOR_OPEN) as u8,
            self.contains(Self::POSTURE) as u8,
            self.contains(Self::STOP_REQUEST) as u8,
        )
    }
}

impl std::fmt::Display for ChargerStatusFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "508.1.0:{} 1:{} 2:{}",
            self.contains(Self::STOP_CONTROL) as u8,
            self.contains(Self::OPERATING) as u8,
            self.contains(Self::CONNECTOR_LOCK) as u8,
        )
    }
}

/// Vehicle CAN frame
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleStatus {
    pub faults: VehicleFaults,
    pub status: VehicleStatusFlags,
    /// Charging current command, 0.1 A
    pub current_request: u16,
    /// Charge voltage limit, 0.1 V
    pub voltage_limit: u16,
    /// Highest voltage the battery accepts, 0.1 V. 0 = not advertised
    pub max_voltage: u16,
}

impl VehicleStatus {
    pub fn fault(&self) -> bool {
        !self.faults.is_empty()
    }
    pub fn charge_permitted(&self) -> bool {
        self.status.contains(VehicleStatusFlags::CHARGE_PERMISSION)
    }
    pub fn contactor_open(&self) -> bool {
        self.status.contains(VehicleStatusFlags::CONTACTOR_OPEN)
    }
    pub fn stop_requested(&self) -> bool {
        self.status.contains(VehicleStatusFlags::STOP_REQUEST)
    }
}

impl Message for VehicleStatus {
    const ID: u32 = 0x500;
    const MIN_LEN: usize = 8;

    fn encode(&self) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[0] = self.faults.bits();
        data[1] = self.status.bits();
        [data[2], data[3]] = self.current_request.to_le_bytes();
        [data[4], data[5]] = self.voltage_limit.to_le_bytes();
        [data[6], data[7]] = self.max_voltage.to_le_bytes();
        data
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let data = data_sanity(data, Self::MIN_LEN)?;
        Some(VehicleStatus {
            faults: VehicleFaults::from_bits_retain(data[0]),
            status: VehicleStatusFlags::from_bits_retain(data[1]),
            current_request: le16(data, 2),
            voltage_limit: le16(data, 4),
            max_voltage: le16(data, 6),
        })
    }
}

/// Vehicle CAN frame
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleParams {
    pub sequence: u8,
    /// State of charge, %
    pub soc: u8,
    /// Maximum charge time the BMS permits, minutes. 0xFFFF = unlimited
    pub max_charge_time: u16,
    /// Estimated time to end of charge, minutes
    pub estimated_end_time: u16,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            sequence: 0,
            soc: 0,
            max_charge_time: CHARGE_TIME_UNLIMITED,
            estimated_end_time: 0,
        }
    }
}

impl Message for VehicleParams {
    const ID: u32 = 0x501;
    const MIN_LEN: usize = 6;

    fn encode(&self) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[0] = self.sequence;
        data[1] = self.soc;
        [data[2], data[3]] = self.max_charge_time.to_le_bytes();
        [data[4], data[5]] = self.estimated_end_time.to_le_bytes();
        data
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let data = data_sanity(data, Self::MIN_LEN)?;
        Some(VehicleParams {
            sequence: data[0],
            soc: data[1],
            max_charge_time: le16(data, 2),
            estimated_end_time: le16(data, 4),
        })
    }
}

/// 0x501 as received. Short frames carry only the leading fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParamsUpdate {
    pub sequence: u8,
    pub soc: u8,
    pub max_charge_time: u16,
    pub estimated_end_time: Option<u16>,
}

impl ParamsUpdate {
    fn decode(data: &[u8]) -> Option<Self> {
        let data = data_sanity(data, 4)?;
        Some(ParamsUpdate {
            sequence: data[0],
            soc: data[1],
            max_charge_time: le16(data, 2),
            estimated_end_time: (data.len() >= 6).then(|| le16(data, 4)),
        })
    }
}

/// Vehicle CAN frame, may be a single byte on the wire
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleEmergency {
    pub flags: VehicleErrorFlags,
}

impl VehicleEmergency {
    pub fn emergency_stop(&self) -> bool {
        self.flags.contains(VehicleErrorFlags::EMERGENCY_STOP)
    }
    pub fn welding_detected(&self) -> bool {
        self.flags.contains(VehicleErrorFlags::WELDING_DETECTION_ERROR)
    }
}

impl Message for VehicleEmergency {
    const ID: u32 = 0x5F0;
    const MIN_LEN: usize = 1;

    fn encode(&self) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[0] = self.flags.bits();
        data
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let data = data_sanity(data, Self::MIN_LEN)?;
        Some(VehicleEmergency {
            flags: VehicleErrorFlags::from_bits_retain(data[0]),
        })
    }
}

/// EVSE CAN frame
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct ChargerStatus {
    pub faults: ChargerFaults,
    pub status: ChargerStatusFlags,
    /// 0.1 V
    pub available_voltage: u16,
    /// 0.1 A
    pub available_current: u16,
    /// Voltage at which the charger stops on its own, 0.1 V
    pub fault_voltage_limit: u16,
}

impl Message for ChargerStatus {
    const ID: u32 = 0x508;
    const MIN_LEN: usize = 8;

    fn encode(&self) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[0] = self.faults.bits();
        data[1] = self.status.bits();
        [data[2], data[3]] = self.available_voltage.to_le_bytes();
        [data[4], data[5]] = self.available_current.to_le_bytes();
        [data[6], data[7]] = self.fault_voltage_limit.to_le_bytes();
        data
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let data = data_sanity(data, Self::MIN_LEN)?;
        Some(ChargerStatus {
            faults: ChargerFaults::from_bits_retain(data[0]),
            status: ChargerStatusFlags::from_bits_retain(data[1]),
            available_voltage: le16(data, 2),
            available_current: le16(data, 4),
            fault_voltage_limit: le16(data, 6),
        })
    }
}

/// EVSE CAN frame
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct ChargerParams {
    pub sequence: u8,
    /// Rated output power, 50 W per bit
    pub rated_power: u8,
    /// 0.1 V
    pub output_voltage: u16,
    /// 0.1 A
    pub output_current: u16,
    /// Minutes, 0xFFFF while the charge timer is stopped
    pub remaining_time: u16,
}

impl Default for ChargerParams {
    fn default() -> Self {
        Self {
            sequence: 0,
            rated_power: 0,
            output_voltage: 0,
            output_current: 0,
            remaining_time: REMAINING_TIME_UNKNOWN,
        }
    }
}

impl Message for ChargerParams {
    const ID: u32 = 0x509;
    const MIN_LEN: usize = 8;

    fn encode(&self) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[0] = self.sequence;
        data[1] = self.rated_power;
        [data[2], data[3]] = self.output_voltage.to_le_bytes();
        [data[4], data[5]] = self.output_current.to_le_bytes();
        [data[6], data[7]] = self.remaining_time.to_le_bytes();
        data
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let data = data_sanity(data, Self::MIN_LEN)?;
        Some(ChargerParams {
            sequence: data[0],
            rated_power: data[1],
            output_voltage: le16(data, 2),
            output_current: le16(data, 4),
            remaining_time: le16(data, 6),
        })
    }
}

/// EVSE CAN frame
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct ChargerEmergency {
    pub flags: ChargerEmergencyFlags,
    pub manufacturer_id: u16,
}

impl Message for ChargerEmergency {
    const ID: u32 = 0x5F8;
    const MIN_LEN: usize = 8;

    fn encode(&self) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[0] = self.flags.bits();
        [data[4], data[5]] = self.manufacturer_id.to_le_bytes();
        data
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let data = data_sanity(data, Self::MIN_LEN)?;
        Some(ChargerEmergency {
            flags: ChargerEmergencyFlags::from_bits_retain(data[0]),
            manufacturer_id: le16(data, 4),
        })
    }
}

/// A decoded vehicle frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VehicleUpdate {
    Status(VehicleStatus),
    Params(ParamsUpdate),
    Emergency(VehicleEmergency),
}

/// Decodes a vehicle frame. Unknown identifiers and frames too short for their
/// message are ignored.
pub fn decode(id: u32, data: &[u8]) -> Option<VehicleUpdate> {
    match id {
        id if id == VehicleStatus::ID => VehicleStatus::decode(data).map(VehicleUpdate::Status),
        id if id == VehicleParams::ID => ParamsUpdate::decode(data).map(VehicleUpdate::Params),
        id if id == VehicleEmergency::ID => {
            VehicleEmergency::decode(data).map(VehicleUpdate::Emergency)
        }
        _ => None,
    }
}

pub fn encode<M: Message>(message: &M) -> [u8; 8] {
    message.encode()
}

/// Latest state of every vehicle message
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleData {
    pub status: VehicleStatus,
    pub params: VehicleParams,
    pub emergency: VehicleEmergency,
}

impl VehicleData {
    pub fn apply(&mut self, update: VehicleUpdate) {
        match update {
            VehicleUpdate::Status(status) => self.status = status,
            VehicleUpdate::Params(params) => {
                self.params.sequence = params.sequence;
                self.params.soc = params.soc;
                self.params.max_charge_time = params.max_charge_time;
                if let Some(end) = params.estimated_end_time {
                    self.params.estimated_end_time = end;
                }
            }
            VehicleUpdate::Emergency(emergency) => self.emergency = emergency,
        }
    }
}

/// Charger messages plus whether they should currently be on the bus
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct ChargerOutgoing {
    pub status: ChargerStatus,
    pub params: ChargerParams,
    pub emergency: ChargerEmergency,
    pub transmit: bool,
}

impl ChargerOutgoing {
    pub fn tx_frames(&self) -> [RawFrame; 3] {
        [
            self.status.to_raw(),
            self.params.to_raw(),
            self.emergency.to_raw(),
        ]
    }
}

/// Rated power in 50 W units for the given limits (0.1 V, 0.1 A)
pub fn rated_power(voltage: u16, current: u16) -> u8 {
    let watts = u32::from(voltage) * u32::from(current) / 100;
    (watts / 50).min(u32::from(u8::MAX)) as u8
}

#[inline]
fn le16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn data_sanity(data: &[u8], min_len: usize) -> Option<&[u8]> {
    (data.len() >= min_len).then_some(data)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn x500_test() {
        let data = [0x00, 0x05, 0x64, 0x00, 0xE8, 0x03, 0xB0, 0x04];
        let Some(VehicleUpdate::Status(x500)) = decode(0x500, &data) else {
            panic!("0x500 not decoded");
        };
        println!("{}", x500.status);
        assert!(x500.charge_permitted());
        assert!(!x500.contactor_open());
        assert!(x500.status.contains(VehicleStatusFlags::POSTURE));
        assert!(!x500.fault());
        assert_eq!(x500.current_request, 100);
        assert_eq!(x500.voltage_limit, 1000);
        assert_eq!(x500.max_voltage, 1200);

        let data = [0x11, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let Some(VehicleUpdate::Status(x500)) = decode(0x500, &data) else {
            panic!("0x500 not decoded");
        };
        assert!(x500.fault());
        assert!(x500.faults.contains(VehicleFaults::SYSTEM_ERROR));
        assert!(x500.faults.contains(VehicleFaults::OVER_TEMPERATURE));
        assert!(x500.contactor_open());
        assert!(!x500.charge_permitted());
    }

    #[test]
    fn x500_short_frame_ignored() {
        assert_eq!(decode(0x500, &[0x00, 0x01, 0x64, 0x00, 0xE8, 0x03, 0xB0]), None);
    }

    #[test]
    fn x501_partial_test() {
        let mut vehicle = VehicleData::default();
        vehicle.apply(decode(0x501, &[0x01, 0x32, 0x3C, 0x00, 0x1E, 0x00]).unwrap());
        assert_eq!(vehicle.params.soc, 50);
        assert_eq!(vehicle.params.max_charge_time, 60);
        assert_eq!(vehicle.params.estimated_end_time, 30);

        // four bytes keep the previous estimated end time
        vehicle.apply(decode(0x501, &[0x02, 0x33, 0x3B, 0x00]).unwrap());
        assert_eq!(vehicle.params.sequence, 2);
        assert_eq!(vehicle.params.soc, 51);
        assert_eq!(vehicle.params.max_charge_time, 59);
        assert_eq!(vehicle.params.estimated_end_time, 30);

        assert_eq!(decode(0x501, &[0x02, 0x33, 0x3B]), None);
    }

    #[test]
    fn x5f0_test() {
        let Some(VehicleUpdate::Emergency(x5f0)) = decode(0x5F0, &[0x03]) else {
            panic!("0x5F0 not decoded");
        };
        assert!(x5f0.emergency_stop());
        assert!(x5f0.welding_detected());
        assert_eq!(decode(0x5F0, &[]), None);
    }

    #[test]
    fn unknown_id_ignored() {
        assert_eq!(decode(0x508, &[0u8; 8]), None);
        assert_eq!(decode(0x123, &[0u8; 8]), None);
    }

    #[test]
    fn reserved_bits_kept() {
        let x500 = VehicleStatus::decode(&[0xC0, 0xF1, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(x500.encode()[0], 0xC0);
        assert_eq!(x500.encode()[1], 0xF1);
        // unnamed fault bits still count as a vehicle fault
        assert!(x500.fault());
    }

    #[test]
    fn x508_test() {
        let x508 = ChargerStatus {
            faults: ChargerFaults::BATTERY_INCOMPATIBLE,
            status: ChargerStatusFlags::OPERATING | ChargerStatusFlags::CONNECTOR_LOCK,
            available_voltage: 1000,
            available_current: 100,
            fault_voltage_limit: 0xFFFF,
        };
        let data = encode(&x508);
        assert_eq!(data, [0x04, 0x06, 0xE8, 0x03, 0x64, 0x00, 0xFF, 0xFF]);
        println!("{}", x508.status);
        assert_eq!(ChargerStatus::decode(&data), Some(x508));
    }

    #[test]
    fn x509_test() {
        let x509 = ChargerParams::default();
        assert_eq!(x509.encode()[6..8], [0xFF, 0xFF]);

        for (voltage, current, remaining) in [(0, 0, 0), (523, 87, 45), (u16::MAX, u16::MAX, 0xFFFE)] {
            let x509 = ChargerParams {
                sequence: 0x12,
                rated_power: 20,
                output_voltage: voltage,
                output_current: current,
                remaining_time: remaining,
            };
            assert_eq!(ChargerParams::decode(&x509.encode()), Some(x509));
        }
    }

    #[test]
    fn x5f8_test() {
        let x5f8 = ChargerEmergency {
            flags: ChargerEmergencyFlags::EMERGENCY_STOP,
            manufacturer_id: 0xBEEF,
        };
        let data = x5f8.encode();
        assert_eq!(data, [0x01, 0, 0, 0, 0xEF, 0xBE, 0, 0]);
        assert_eq!(ChargerEmergency::decode(&data), Some(x5f8));
    }

    #[test]
    fn tx_frames_order() {
        let ids: Vec<u32> = ChargerOutgoing::default()
            .tx_frames()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(ids, vec![0x508, 0x509, 0x5F8]);
    }

    const WORDS: [u16; 6] = [0, 1, 0x00FF, 0x0100, 0x7FFF, 0xFFFF];
    const BYTES: [u8; 4] = [0, 1, 0x7F, 0xFF];

    fn round_trip<M: Message + PartialEq + std::fmt::Debug>(message: M) {
        let data = message.encode();
        assert_eq!(M::decode(&data), Some(message), "{data:02X?}");
    }

    /// Every single bit of a flag byte plus the all-set pattern
    fn flag_bytes() -> impl Iterator<Item = u8> {
        (0..8).map(|bit| 1u8 << bit).chain([0x00, 0xFF])
    }

    #[test]
    fn vehicle_messages_round_trip() {
        for bits in flag_bytes() {
            for word in WORDS {
                let x500 = VehicleStatus {
                    faults: VehicleFaults::from_bits_retain(bits),
                    status: VehicleStatusFlags::from_bits_retain(bits.rotate_left(1)),
                    current_request: word,
                    voltage_limit: word.rotate_left(3),
                    max_voltage: !word,
                };
                round_trip(x500);
                assert_eq!(decode(0x500, &x500.encode()), Some(VehicleUpdate::Status(x500)));
            }
            round_trip(VehicleEmergency {
                flags: VehicleErrorFlags::from_bits_retain(bits),
            });
        }

        for byte in BYTES {
            for word in WORDS {
                let x501 = VehicleParams {
                    sequence: byte,
                    soc: !byte,
                    max_charge_time: word,
                    estimated_end_time: !word,
                };
                round_trip(x501);
                let mut vehicle = VehicleData::default();
                vehicle.apply(decode(0x501, &x501.encode()).unwrap());
                assert_eq!(vehicle.params, x501);
            }
        }
    }

    #[test]
    fn charger_messages_round_trip() {
        for bits in flag_bytes() {
            for word in WORDS {
                round_trip(ChargerStatus {
                    faults: ChargerFaults::from_bits_retain(bits),
                    status: ChargerStatusFlags::from_bits_retain(bits.rotate_left(1)),
                    available_voltage: word,
                    available_current: !word,
                    fault_voltage_limit: word.rotate_left(3),
                });
                round_trip(ChargerEmergency {
                    flags: ChargerEmergencyFlags::from_bits_retain(bits),
                    manufacturer_id: word,
                });
            }
        }

        for byte in BYTES {
            for word in WORDS {
                round_trip(ChargerParams {
                    sequence: byte,
                    rated_power: !byte,
                    output_voltage: word,
                    output_current: !word,
                    remaining_time: word.rotate_left(3),
                });
            }
        }
    }

    #[test]
    fn rated_power_test() {
        assert_eq!(rated_power(1000, 100), 20);
        assert_eq!(rated_power(1200, 1000), 240);
        assert_eq!(rated_power(12000, 10000), 255);
        // 84.5 V * 25.5 A = 2154 W
        assert_eq!(rated_power(845, 255), 43);
        assert_eq!(rated_power(u16::MAX, u16::MAX), 255);
    }
}
