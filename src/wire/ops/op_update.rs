use bson::Document;

use crate::utils::{get_bit_u32, set_bit_u32};
use crate::wire::error::WireResult;
use crate::wire::utils::{
    ensure_consumed, parse_bson_document, parse_cstring, parse_u32, serialize_bson_document,
    serialize_cstring, serialize_u32,
};

const UPSERT_BIT: u8 = 0;
const MULTI_UPDATE_BIT: u8 = 1;

/// @see https://docs.mongodb.com/manual/reference/mongodb-wire-protocol/#op-update
#[derive(Debug, Clone, PartialEq)]
pub struct OpUpdate {
    // "dbname.collectionname"
    pub full_collection_name: String,

    // bit vector.
    pub flags: u32,

    // the query to select the document
    pub selector: Document,

    // specification of the update to perform
    pub update: Document,
}

impl OpUpdate {
    pub fn upsert(&self) -> bool {
        get_bit_u32(self.flags, UPSERT_BIT)
    }

    pub fn multi_update(&self) -> bool {
        get_bit_u32(self.flags, MULTI_UPDATE_BIT)
    }

    pub fn set_upsert(&mut self, value: bool) {
        set_bit_u32(&mut self.flags, UPSERT_BIT, value);
    }

    pub fn set_multi_update(&mut self, value: bool) {
        set_bit_u32(&mut self.flags, MULTI_UPDATE_BIT, value);
    }
}

pub fn parse_op_update(buffer: &[u8]) -> WireResult<OpUpdate> {
    // ZERO, reserved
    let (_zero, next_buffer) = parse_u32(buffer)?;
    let (full_collection_name, next_buffer) = parse_cstring(next_buffer)?;
    let (flags, next_buffer) = parse_u32(next_buffer)?;
    let (selector, next_buffer) = parse_bson_document(next_buffer)?;
    let (update, next_buffer) = parse_bson_document(next_buffer)?;
    ensure_consumed(next_buffer)?;
    Ok(OpUpdate {
        full_collection_name,
        flags,
        selector,
        update,
    })
}

pub fn serialize_op_update(buffer: &mut Vec<u8>, op: &OpUpdate) -> WireResult<()> {
    serialize_u32(buffer, 0);
    serialize_cstring(buffer, &op.full_collection_name)?;
    serialize_u32(buffer, op.flags);
    serialize_bson_document(buffer, &op.selector)?;
    serialize_bson_document(buffer, &op.update)?;
    Ok(())
}
