use bson::Document;

use crate::wire::error::WireResult;
use crate::wire::utils::{
    parse_bson_documents, parse_cstring, parse_u32, serialize_bson_document, serialize_cstring,
    serialize_u32,
};

/// @see https://docs.mongodb.com/manual/reference/mongodb-wire-protocol/#op-insert
#[derive(Debug, Clone, PartialEq)]
pub struct OpInsert {
    // bit vector
    pub flags: u32,

    // "dbname.collectionname"
    pub full_collection_name: String,

    // one or more documents to insert into the collection
    pub documents: Vec<Document>,
}

pub fn parse_op_insert(buffer: &[u8]) -> WireResult<OpInsert> {
    let (flags, next_buffer) = parse_u32(buffer)?;
    let (full_collection_name, next_buffer) = parse_cstring(next_buffer)?;
    let documents = parse_bson_documents(next_buffer)?;
    Ok(OpInsert {
        flags,
        full_collection_name,
        documents,
    })
}

pub fn serialize_op_insert(buffer: &mut Vec<u8>, op: &OpInsert) -> WireResult<()> {
    serialize_u32(buffer, op.flags);
    serialize_cstring(buffer, &op.full_collection_name)?;
    for document in &op.documents {
        serialize_bson_document(buffer, document)?;
    }
    Ok(())
}
