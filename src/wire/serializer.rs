use crate::wire::error::WireResult;
use crate::wire::ops::msg_header::{serialize_msg_header, MsgHeader, MSG_HEADER_SIZE};
use crate::wire::ops::op::MongoOp;
use crate::wire::ops::op_delete::serialize_op_delete;
use crate::wire::ops::op_get_more::serialize_op_get_more;
use crate::wire::ops::op_insert::serialize_op_insert;
use crate::wire::ops::op_kill_cursors::serialize_op_kill_cursors;
use crate::wire::ops::op_query::serialize_op_query;
use crate::wire::ops::op_reply::serialize_op_reply;
use crate::wire::ops::op_update::serialize_op_update;

fn serialize_op_body(buffer: &mut Vec<u8>, op: &MongoOp) -> WireResult<()> {
    match op {
        MongoOp::Reply(op) => serialize_op_reply(buffer, op),
        MongoOp::Update(op) => serialize_op_update(buffer, op),
        MongoOp::Insert(op) => serialize_op_insert(buffer, op),
        MongoOp::Query(op) => serialize_op_query(buffer, op),
        MongoOp::GetMore(op) => serialize_op_get_more(buffer, op),
        MongoOp::Delete(op) => serialize_op_delete(buffer, op),
        MongoOp::KillCursors(op) => serialize_op_kill_cursors(buffer, op),
    }
}

/// Encodes `op` as a complete length-prefixed frame.
pub fn serialize_frame(request_id: u32, response_to: u32, op: &MongoOp) -> WireResult<Vec<u8>> {
    let mut body = vec![];
    serialize_op_body(&mut body, op)?;
    let header = MsgHeader {
        message_length: (MSG_HEADER_SIZE + body.len()) as u32,
        request_id,
        response_to,
        op_code: op.op_code(),
    };
    let mut frame = Vec::with_capacity(MSG_HEADER_SIZE + body.len());
    serialize_msg_header(&mut frame, &header);
    frame.append(&mut body);
    Ok(frame)
}
