use bson::Document;

use crate::wire::error::WireResult;
use crate::wire::utils::{
    ensure_consumed, parse_bson_document, parse_cstring, parse_i32, parse_u32,
    serialize_bson_document, serialize_cstring, serialize_i32, serialize_u32,
};

/// @see https://docs.mongodb.com/manual/reference/mongodb-wire-protocol/#op-query
#[derive(Debug, Clone, PartialEq)]
pub struct OpQuery {
    // bit vector of query options.
    pub flags: u32,

    // "dbname.collectionname"
    pub full_collection_name: String,

    // number of documents to skip
    pub number_to_skip: i32,

    // number of documents to return in the first OP_REPLY batch
    pub number_to_return: i32,

    // query object.
    pub query: Document,

    // Optional. Selector indicating the fields to return.
    pub return_fields_selector: Option<Document>,
}

pub fn parse_op_query(buffer: &[u8]) -> WireResult<OpQuery> {
    let (flags, next_buffer) = parse_u32(buffer)?;
    let (full_collection_name, next_buffer) = parse_cstring(next_buffer)?;
    let (number_to_skip, next_buffer) = parse_i32(next_buffer)?;
    let (number_to_return, next_buffer) = parse_i32(next_buffer)?;
    let (query, next_buffer) = parse_bson_document(next_buffer)?;
    let return_fields_selector = if next_buffer.is_empty() {
        None
    } else {
        let (selector, next_buffer) = parse_bson_document(next_buffer)?;
        ensure_consumed(next_buffer)?;
        Some(selector)
    };
    Ok(OpQuery {
        flags,
        full_collection_name,
        number_to_skip,
        number_to_return,
        query,
        return_fields_selector,
    })
}

pub fn serialize_op_query(buffer: &mut Vec<u8>, op: &OpQuery) -> WireResult<()> {
    serialize_u32(buffer, op.flags);
    serialize_cstring(buffer, &op.full_collection_name)?;
    serialize_i32(buffer, op.number_to_skip);
    serialize_i32(buffer, op.number_to_return);
    serialize_bson_document(buffer, &op.query)?;
    if let Some(selector) = &op.return_fields_selector {
        serialize_bson_document(buffer, selector)?;
    }
    Ok(())
}
