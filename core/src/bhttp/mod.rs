// Binary HTTP module — RFC 9292 framing for join requests carried over OHTTP

pub mod control;
pub mod fields;
pub mod message;
pub mod varint;

pub use control::{InformativeResponse, RequestControlData, ResponseControlData};
pub use fields::{Field, Fields};
pub use message::{BinaryHttpMessage, ControlData};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BhttpError {
    #[error("Message truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("Unknown framing indicator {0}")]
    UnknownFraming(u64),
    #[error("Value {0} does not fit a variable-length integer")]
    VarintOverflow(u64),
    #[error("Invalid informational status code {0}")]
    InvalidInformationalStatus(u64),
    #[error("Invalid final status code {0}")]
    InvalidFinalStatus(u64),
    #[error("Field section length mismatch")]
    FieldSectionLength,
    #[error("Non-zero byte in padding at offset {0}")]
    NonZeroPadding(usize),
    #[error("Field name must not be empty")]
    EmptyFieldName,
    #[error("Control data is not valid UTF-8")]
    InvalidUtf8,
    #[error("Control data does not match the framing indicator")]
    ControlDataMismatch,
}

/// First byte(s) of every binary HTTP message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramingIndicator {
    KnownLengthRequest,
    KnownLengthResponse,
    IndeterminateLengthRequest,
    IndeterminateLengthResponse,
}

impl FramingIndicator {
    pub fn value(self) -> u64 {
        match self {
            FramingIndicator::KnownLengthRequest => 0,
            FramingIndicator::KnownLengthResponse => 1,
            FramingIndicator::IndeterminateLengthRequest => 2,
            FramingIndicator::IndeterminateLengthResponse => 3,
        }
    }

    pub fn from_value(value: u64) -> Result<Self, BhttpError> {
        match value {
            0 => Ok(FramingIndicator::KnownLengthRequest),
            1 => Ok(FramingIndicator::KnownLengthResponse),
            2 => Ok(FramingIndicator::IndeterminateLengthRequest),
            3 => Ok(FramingIndicator::IndeterminateLengthResponse),
            other => Err(BhttpError::UnknownFraming(other)),
        }
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            FramingIndicator::KnownLengthRequest | FramingIndicator::IndeterminateLengthRequest
        )
    }

    pub fn is_known_length(self) -> bool {
        matches!(
            self,
            FramingIndicator::KnownLengthRequest | FramingIndicator::KnownLengthResponse
        )
    }
}
