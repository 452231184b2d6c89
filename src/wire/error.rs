use thiserror::Error;

use crate::wire::ops::opcodes::MongoOpCode;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("cstring contains an interior zero byte")]
    CstringContainZeroByte,
    #[error("cstring is missing its terminating zero byte")]
    NoZeroTrailingInCstringBuffer,
    #[error("cstring is not valid utf-8")]
    CstringInvalidUtf8,
    #[error("buffer too short: needed {needed} bytes, {available} available")]
    NotEnoughBufferSize { needed: usize, available: usize },
    #[error("declared frame length {declared} does not match {actual} bytes read")]
    FrameLengthMismatch { declared: u32, actual: usize },
    #[error("invalid bson document size {0}")]
    InvalidDocumentSize(i32),
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),
    #[error("reply declares {declared} documents but carries {actual}")]
    DocumentCountMismatch { declared: i32, actual: usize },
    #[error("negative element count {0}")]
    NegativeCount(i32),
    #[error("unknown op code {0}")]
    UnknownOpCode(u32),
    #[error("op code {0:?} is not supported by this codec")]
    UnimplementedOpCode(MongoOpCode),
    #[error("failed to decode bson: {0}")]
    ParseBsonError(#[from] bson::de::Error),
    #[error("failed to encode bson: {0}")]
    SerializeBsonError(#[from] bson::ser::Error),
}

pub type WireResult<T> = Result<T, WireError>;
