use crate::wire::error::WireResult;
use crate::wire::utils::{
    ensure_consumed, parse_cstring, parse_i32, parse_i64, parse_u32, serialize_cstring,
    serialize_i32, serialize_i64, serialize_u32,
};

/// @see https://docs.mongodb.com/manual/reference/mongodb-wire-protocol/#op-get-more
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpGetMore {
    // "dbname.collectionname"
    pub full_collection_name: String,

    // number of documents to return
    pub number_to_return: i32,

    // cursorID from the OP_REPLY
    pub cursor_id: i64,
}

pub fn parse_op_get_more(buffer: &[u8]) -> WireResult<OpGetMore> {
    let (_zero, next_buffer) = parse_u32(buffer)?;
    let (full_collection_name, next_buffer) = parse_cstring(next_buffer)?;
    let (number_to_return, next_buffer) = parse_i32(next_buffer)?;
    let (cursor_id, next_buffer) = parse_i64(next_buffer)?;
    ensure_consumed(next_buffer)?;
    Ok(OpGetMore {
        full_collection_name,
        number_to_return,
        cursor_id,
    })
}

pub fn serialize_op_get_more(buffer: &mut Vec<u8>, op: &OpGetMore) -> WireResult<()> {
    serialize_u32(buffer, 0);
    serialize_cstring(buffer, &op.full_collection_name)?;
    serialize_i32(buffer, op.number_to_return);
    serialize_i64(buffer, op.cursor_id);
    Ok(())
}
