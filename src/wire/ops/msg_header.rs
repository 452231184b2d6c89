// @see https://docs.mongodb.com/manual/reference/mongodb-wire-protocol/#standard-message-header

use crate::wire::error::{WireError, WireResult};
use crate::wire::ops::opcodes::MongoOpCode;
use crate::wire::utils::{parse_u32, serialize_u32};

pub const MSG_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHeader {
    // total message size, including this
    pub message_length: u32,

    // identifier for this message
    pub request_id: u32,

    // requestID from the original request (used in responses from db)
    pub response_to: u32,

    // request type
    pub op_code: MongoOpCode,
}

pub fn parse_msg_header(buffer: &[u8]) -> WireResult<(MsgHeader, &[u8])> {
    let (message_length, next_buffer) = parse_u32(buffer)?;
    let (request_id, next_buffer) = parse_u32(next_buffer)?;
    let (response_to, next_buffer) = parse_u32(next_buffer)?;
    let (op_code_u32, next_buffer) = parse_u32(next_buffer)?;
    let op_code = MongoOpCode::from_u32(op_code_u32).ok_or(WireError::UnknownOpCode(op_code_u32))?;
    Ok((
        MsgHeader {
            message_length,
            request_id,
            response_to,
            op_code,
        },
        next_buffer,
    ))
}

pub fn serialize_msg_header(buffer: &mut Vec<u8>, header: &MsgHeader) {
    serialize_u32(buffer, header.message_length);
    serialize_u32(buffer, header.request_id);
    serialize_u32(buffer, header.response_to);
    serialize_u32(buffer, header.op_code.as_u32());
}
