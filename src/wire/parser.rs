use crate::wire::error::{WireError, WireResult};
use crate::wire::ops::msg_header::{parse_msg_header, MsgHeader};
use crate::wire::ops::op::MongoOp;
use crate::wire::ops::op_delete::parse_op_delete;
use crate::wire::ops::op_get_more::parse_op_get_more;
use crate::wire::ops::op_insert::parse_op_insert;
use crate::wire::ops::op_kill_cursors::parse_op_kill_cursors;
use crate::wire::ops::op_query::parse_op_query;
use crate::wire::ops::op_reply::parse_op_reply;
use crate::wire::ops::op_update::parse_op_update;
use crate::wire::ops::opcodes::MongoOpCode;

/// Decodes one complete frame. `buffer` must hold exactly the bytes of the
/// frame; the declared message length is checked against it.
pub fn parse_frame(buffer: &[u8]) -> WireResult<(MsgHeader, MongoOp)> {
    let (header, body) = parse_msg_header(buffer)?;
    if header.message_length as usize != buffer.len() {
        return Err(WireError::FrameLengthMismatch {
            declared: header.message_length,
            actual: buffer.len(),
        });
    }
    let op = match header.op_code {
        MongoOpCode::OpReply => MongoOp::Reply(parse_op_reply(body)?),
        MongoOpCode::OpUpdate => MongoOp::Update(parse_op_update(body)?),
        MongoOpCode::OpInsert => MongoOp::Insert(parse_op_insert(body)?),
        MongoOpCode::OpQuery => MongoOp::Query(parse_op_query(body)?),
        MongoOpCode::OpGetMore => MongoOp::GetMore(parse_op_get_more(body)?),
        MongoOpCode::OpDelete => MongoOp::Delete(parse_op_delete(body)?),
        MongoOpCode::OpKillCursors => MongoOp::KillCursors(parse_op_kill_cursors(body)?),
        op_code => return Err(WireError::UnimplementedOpCode(op_code)),
    };
    Ok((header, op))
}
