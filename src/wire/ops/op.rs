use crate::wire::ops::op_delete::OpDelete;
use crate::wire::ops::op_get_more::OpGetMore;
use crate::wire::ops::op_insert::OpInsert;
use crate::wire::ops::op_kill_cursors::OpKillCursors;
use crate::wire::ops::op_query::OpQuery;
use crate::wire::ops::op_reply::OpReply;
use crate::wire::ops::op_update::OpUpdate;
use crate::wire::ops::opcodes::MongoOpCode;

#[derive(Debug, Clone, PartialEq)]
pub enum MongoOp {
    Reply(OpReply),
    Update(OpUpdate),
    Insert(OpInsert),
    Query(OpQuery),
    GetMore(OpGetMore),
    Delete(OpDelete),
    KillCursors(OpKillCursors),
}

impl MongoOp {
    pub fn op_code(&self) -> MongoOpCode {
        match self {
            MongoOp::Reply(_) => MongoOpCode::OpReply,
            MongoOp::Update(_) => MongoOpCode::OpUpdate,
            MongoOp::Insert(_) => MongoOpCode::OpInsert,
            MongoOp::Query(_) => MongoOpCode::OpQuery,
            MongoOp::GetMore(_) => MongoOpCode::OpGetMore,
            MongoOp::Delete(_) => MongoOpCode::OpDelete,
            MongoOp::KillCursors(_) => MongoOpCode::OpKillCursors,
        }
    }

    /// Whether the server answers this op with an OP_REPLY.
    pub fn expects_reply(&self) -> bool {
        match self {
            MongoOp::Query(_) | MongoOp::GetMore(_) => true,
            _ => false,
        }
    }
}
