use bson::Document;

use crate::utils::{get_bit_u32, set_bit_u32};
use crate::wire::error::{WireError, WireResult};
use crate::wire::utils::{
    parse_bson_document, parse_i32, parse_i64, parse_u32,
    serialize_bson_document, serialize_i32, serialize_i64, serialize_u32,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpReplyResponseFlags {
    pub cursor_not_found: bool,
    pub query_failure: bool,
    pub shard_config_stale: bool,
    pub await_capable: bool,
}

pub fn parse_op_reply_response_flags(flags: u32) -> OpReplyResponseFlags {
    OpReplyResponseFlags {
        cursor_not_found: get_bit_u32(flags, 0),
        query_failure: get_bit_u32(flags, 1),
        shard_config_stale: get_bit_u32(flags, 2),
        await_capable: get_bit_u32(flags, 3),
    }
}

pub fn serialize_op_reply_response_flags(flags: &OpReplyResponseFlags) -> u32 {
    let mut result = 0u32;
    set_bit_u32(&mut result, 0, flags.cursor_not_found);
    set_bit_u32(&mut result, 1, flags.query_failure);
    set_bit_u32(&mut result, 2, flags.shard_config_stale);
    set_bit_u32(&mut result, 3, flags.await_capable);
    result
}

/// @see https://docs.mongodb.com/manual/reference/mongodb-wire-protocol/#op-reply
#[derive(Debug, Clone, PartialEq)]
pub struct OpReply {
    // bit vector
    pub response_flags: u32,

    // cursor id if client needs to do get more's
    pub cursor_id: i64,

    // where in the cursor this reply is starting
    pub starting_from: i32,

    // documents, their count is written as numberReturned
    pub documents: Vec<Document>,
}

impl OpReply {
    pub fn flags(&self) -> OpReplyResponseFlags {
        parse_op_reply_response_flags(self.response_flags)
    }
}

pub fn parse_op_reply(buffer: &[u8]) -> WireResult<OpReply> {
    let (response_flags, next_buffer) = parse_u32(buffer)?;
    let (cursor_id, next_buffer) = parse_i64(next_buffer)?;
    let (starting_from, next_buffer) = parse_i32(next_buffer)?;
    let (number_returned, mut next_buffer) = parse_i32(next_buffer)?;
    if number_returned < 0 {
        return Err(WireError::NegativeCount(number_returned));
    }
    let mut documents = Vec::new();
    while !next_buffer.is_empty() {
        let (document, rest_buffer) = parse_bson_document(next_buffer)?;
        next_buffer = rest_buffer;
        documents.push(document);
    }
    if documents.len() != number_returned as usize {
        return Err(WireError::DocumentCountMismatch {
            declared: number_returned,
            actual: documents.len(),
        });
    }
    Ok(OpReply {
        response_flags,
        cursor_id,
        starting_from,
        documents,
    })
}

pub fn serialize_op_reply(buffer: &mut Vec<u8>, op_reply: &OpReply) -> WireResult<()> {
    serialize_u32(buffer, op_reply.response_flags);
    serialize_i64(buffer, op_reply.cursor_id);
    serialize_i32(buffer, op_reply.starting_from);
    serialize_i32(buffer, op_reply.documents.len() as i32);
    for document in &op_reply.documents {
        serialize_bson_document(buffer, document)?;
    }
    Ok(())
}

#[cfg(test)]
mod op_reply_tests {
    use bson::doc;

    use super::*;

    #[test]
    fn test_response_flags() {
        let flags = OpReplyResponseFlags {
            cursor_not_found: true,
            query_failure: false,
            shard_config_stale: false,
            await_capable: true,
        };
        let bits = serialize_op_reply_response_flags(&flags);
        assert_eq!(bits, 0b1001);
        assert_eq!(parse_op_reply_response_flags(bits), flags);
    }

    #[test]
    fn test_parse_reply_with_extra_document() {
        let reply = OpReply {
            response_flags: 0,
            cursor_id: 0,
            starting_from: 0,
            documents: vec![doc! { "ok": 1.0 }, doc! { "ok": 1.0 }],
        };
        let mut buffer = vec![];
        serialize_op_reply(&mut buffer, &reply).unwrap();
        // numberReturned sits after flags, cursor id and startingFrom
        buffer[16..20].copy_from_slice(&1i32.to_le_bytes());
        match parse_op_reply(&buffer) {
            Err(WireError::DocumentCountMismatch { declared, actual }) => {
                assert_eq!(declared, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_huge_declared_count_is_rejected() {
        let mut buffer = vec![];
        let empty = OpReply {
            response_flags: 0,
            cursor_id: 0,
            starting_from: 0,
            documents: vec![],
        };
        serialize_op_reply(&mut buffer, &empty).unwrap();
        buffer[16..20].copy_from_slice(&i32::MAX.to_le_bytes());
        match parse_op_reply(&buffer) {
            Err(WireError::DocumentCountMismatch { declared, actual }) => {
                assert_eq!(declared, i32::MAX);
                assert_eq!(actual, 0);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
