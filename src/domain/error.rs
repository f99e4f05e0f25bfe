use crate::domain::models::CharacteristicId;
use thiserror::Error;

/// Failures raised by the GATT transport itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no live device session")]
    NotConnected,

    #[error("link error: {0}")]
    Link(String),

    #[error("GATT operation returned status {0}")]
    Status(String),
}

/// Error type for every band operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BandError {
    #[error("device selection was declined or no matching device was found")]
    UserDeclined,

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("characteristic {0} is unavailable for this session")]
    CharacteristicUnavailable(CharacteristicId),

    #[error("malformed {reading} payload: expected at least {expected} bytes, got {actual}")]
    MalformedPayload {
        reading: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unrecognized battery status code {0}")]
    UnrecognizedCode(u8),
}

pub type BandResult<T> = Result<T, BandError>;
