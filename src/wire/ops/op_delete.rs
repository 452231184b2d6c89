use bson::Document;

use crate::utils::{get_bit_u32, set_bit_u32};
use crate::wire::error::WireResult;
use crate::wire::utils::{
    ensure_consumed, parse_bson_document, parse_cstring, parse_u32, serialize_bson_document,
    serialize_cstring, serialize_u32,
};

const SINGLE_REMOVE_BIT: u8 = 0;

/// @see https://docs.mongodb.com/manual/reference/mongodb-wire-protocol/#op-delete
#[derive(Debug, Clone, PartialEq)]
pub struct OpDelete {
    // "dbname.collectionname"
    pub full_collection_name: String,

    // bit vector
    pub flags: u32,

    // query object.
    pub selector: Document,
}

impl OpDelete {
    pub fn single_remove(&self) -> bool {
        get_bit_u32(self.flags, SINGLE_REMOVE_BIT)
    }

    pub fn set_single_remove(&mut self, value: bool) {
        set_bit_u32(&mut self.flags, SINGLE_REMOVE_BIT, value);
    }
}

pub fn parse_op_delete(buffer: &[u8]) -> WireResult<OpDelete> {
    let (_zero, next_buffer) = parse_u32(buffer)?;
    let (full_collection_name, next_buffer) = parse_cstring(next_buffer)?;
    let (flags, next_buffer) = parse_u32(next_buffer)?;
    let (selector, next_buffer) = parse_bson_document(next_buffer)?;
    ensure_consumed(next_buffer)?;
    Ok(OpDelete {
        full_collection_name,
        flags,
        selector,
    })
}

pub fn serialize_op_delete(buffer: &mut Vec<u8>, op: &OpDelete) -> WireResult<()> {
    serialize_u32(buffer, 0);
    serialize_cstring(buffer, &op.full_collection_name)?;
    serialize_u32(buffer, op.flags);
    serialize_bson_document(buffer, &op.selector)
}
