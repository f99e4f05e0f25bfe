//! Client for the Mi Band wearable's GATT service: decoded battery, device
//! and link readings plus a live step counter stream.

pub mod domain;
pub mod infrastructure;

pub use domain::error::{BandError, BandResult, TransportError};
pub use domain::models::{
    AppEvent, BatteryInfo, BatteryStatus, CharacteristicId, ConnectOutcome, ConnectionParameters,
    ConnectionStatus, DeviceInfo, StepCount, Version,
};
pub use infrastructure::bluetooth::MiBand;
