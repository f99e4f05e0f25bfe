use crate::domain::error::BandError;
use chrono::NaiveDateTime;
use std::fmt;

/// Step counter value reported by the band.
pub type StepCount = u32;

/// The fixed set of characteristics exposed under the band's primary service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacteristicId {
    BatteryInfo,
    Steps,
    DeviceInfo,
    ControlPoint,
    ConnectionParameters,
}

impl CharacteristicId {
    pub const ALL: [CharacteristicId; 5] = [
        CharacteristicId::BatteryInfo,
        CharacteristicId::Steps,
        CharacteristicId::DeviceInfo,
        CharacteristicId::ControlPoint,
        CharacteristicId::ConnectionParameters,
    ];

    /// 16-bit assigned identifier on the wire
    pub const fn uuid16(self) -> u16 {
        match self {
            Self::BatteryInfo => 0xFF0C,
            Self::Steps => 0xFF06,
            Self::DeviceInfo => 0xFF01,
            Self::ControlPoint => 0xFF05,
            Self::ConnectionParameters => 0xFF09,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::BatteryInfo => "battery info",
            Self::Steps => "steps",
            Self::DeviceInfo => "device info",
            Self::ControlPoint => "control point",
            Self::ConnectionParameters => "connection parameters",
        }
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X})", self.name(), self.uuid16())
    }
}

/// Charging state reported in byte 9 of the battery payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Unknown,
    Low,
    Charging,
    FullCharging,
    NotCharging,
    /// Code outside the documented 0-4 range, kept as received
    Unrecognized(u8),
}

impl BatteryStatus {
    /// Lenient conversion: codes outside 0-4 map to [`BatteryStatus::Unrecognized`].
    pub fn from_code(code: u8) -> Self {
        Self::try_from(code).unwrap_or(Self::Unrecognized(code))
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Low => 1,
            Self::Charging => 2,
            Self::FullCharging => 3,
            Self::NotCharging => 4,
            Self::Unrecognized(code) => *code,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Low => "Battery Low",
            Self::Charging => "Battery charging",
            Self::FullCharging => "Battery full (charging)",
            Self::NotCharging => "Not charging",
            Self::Unrecognized(_) => "Unrecognized",
        }
    }
}

impl TryFrom<u8> for BatteryStatus {
    type Error = BandError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Low),
            2 => Ok(Self::Charging),
            3 => Ok(Self::FullCharging),
            4 => Ok(Self::NotCharging),
            other => Err(BandError::UnrecognizedCode(other)),
        }
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryInfo {
    /// Charge level in percent
    pub level: u8,
    pub status: BatteryStatus,
    pub charge_cycles: u16,
    pub last_charge: NaiveDateTime,
}

impl BatteryInfo {
    pub fn status_code(&self) -> u8 {
        self.status.code()
    }

    pub fn status_text(&self) -> &'static str {
        self.status.label()
    }
}

/// Four-component version, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware_version: Version,
    pub profile_version: Version,
}

/// Link-layer parameters, already scaled to milliseconds where applicable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionParameters {
    pub min_interval_ms: f64,
    pub max_interval_ms: f64,
    /// Slave latency in connection events
    pub latency: u16,
    pub supervision_timeout_ms: u32,
    pub connection_interval_ms: f64,
    pub advertising_interval_ms: f64,
}

/// Result of [`crate::infrastructure::bluetooth::MiBand::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Declined,
    Failed(BandError),
}

impl ConnectOutcome {
    /// Collapses the outcome to the plain success flag a simple UI needs.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionStatus),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
