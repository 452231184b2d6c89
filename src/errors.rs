use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::wire::WireError;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no connection to {hosts} opened within {timeout:?}")]
    ConnectionTimeout { hosts: String, timeout: Duration },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("corrupt frame: {0}")]
    FrameCorruption(String),

    #[error("write error {code}: {message}")]
    Write { code: i32, message: String },

    #[error("index conflict {code}: {message}")]
    IndexConflict { code: i32, message: String },

    #[error("command failed {code}: {message}")]
    Command { code: i32, message: String },

    #[error("cursor closed")]
    CursorClosed,

    #[error("cursor {0} not found on server")]
    CursorNotFound(i64),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode bson: {0}")]
    BsonEncode(#[from] bson::ser::Error),

    #[error("failed to decode bson: {0}")]
    BsonDecode(#[from] bson::de::Error),
}

impl From<WireError> for DriverError {
    fn from(error: WireError) -> DriverError {
        DriverError::FrameCorruption(error.to_string())
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod errors_tests {
    use super::*;

    #[test]
    fn test_wire_error_becomes_frame_corruption() {
        let error: DriverError = WireError::TrailingBytes(3).into();
        match &error {
            DriverError::FrameCorruption(message) => assert!(message.contains("3 trailing")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_write_error_display() {
        let error = DriverError::Write {
            code: 11000,
            message: "duplicate key".to_string(),
        };
        assert_eq!(error.to_string(), "write error 11000: duplicate key");
    }
}
