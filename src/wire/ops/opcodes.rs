/// @see https://docs.mongodb.com/manual/reference/mongodb-wire-protocol/#request-opcodes
pub const MONGO_OP_REPLY_CODE: u32 = 1;
pub const MONGO_OP_UPDATE_CODE: u32 = 2001;
pub const MONGO_OP_INSERT_CODE: u32 = 2002;
pub const MONGO_OP_QUERY_CODE: u32 = 2004;
pub const MONGO_OP_GET_MORE_CODE: u32 = 2005;
pub const MONGO_OP_DELETE_CODE: u32 = 2006;
pub const MONGO_OP_KILL_CURSORS_CODE: u32 = 2007;
pub const MONGO_OP_COMMAND_CODE: u32 = 2010;
pub const MONGO_OP_COMMAND_REPLY_CODE: u32 = 2011;
pub const MONGO_OP_MSG_CODE: u32 = 2013;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MongoOpCode {
    OpReply,
    OpUpdate,
    OpInsert,
    OpQuery,
    OpGetMore,
    OpDelete,
    OpKillCursors,
    OpCommand,
    OpCommandReply,
    OpMsg,
}

impl MongoOpCode {
    pub fn from_u32(op: u32) -> Option<MongoOpCode> {
        match op {
            MONGO_OP_REPLY_CODE => Some(MongoOpCode::OpReply),
            MONGO_OP_UPDATE_CODE => Some(MongoOpCode::OpUpdate),
            MONGO_OP_INSERT_CODE => Some(MongoOpCode::OpInsert),
            MONGO_OP_QUERY_CODE => Some(MongoOpCode::OpQuery),
            MONGO_OP_GET_MORE_CODE => Some(MongoOpCode::OpGetMore),
            MONGO_OP_DELETE_CODE => Some(MongoOpCode::OpDelete),
            MONGO_OP_KILL_CURSORS_CODE => Some(MongoOpCode::OpKillCursors),
            MONGO_OP_COMMAND_CODE => Some(MongoOpCode::OpCommand),
            MONGO_OP_COMMAND_REPLY_CODE => Some(MongoOpCode::OpCommandReply),
            MONGO_OP_MSG_CODE => Some(MongoOpCode::OpMsg),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            MongoOpCode::OpReply => MONGO_OP_REPLY_CODE,
            MongoOpCode::OpUpdate => MONGO_OP_UPDATE_CODE,
            MongoOpCode::OpInsert => MONGO_OP_INSERT_CODE,
            MongoOpCode::OpQuery => MONGO_OP_QUERY_CODE,
            MongoOpCode::OpGetMore => MONGO_OP_GET_MORE_CODE,
            MongoOpCode::OpDelete => MONGO_OP_DELETE_CODE,
            MongoOpCode::OpKillCursors => MONGO_OP_KILL_CURSORS_CODE,
            MongoOpCode::OpCommand => MONGO_OP_COMMAND_CODE,
            MongoOpCode::OpCommandReply => MONGO_OP_COMMAND_REPLY_CODE,
            MongoOpCode::OpMsg => MONGO_OP_MSG_CODE,
        }
    }
}

#[cfg(test)]
mod opcodes_tests {
    use super::*;

    #[test]
    fn test_known_codes_map_back() {
        for code in &[1, 2001, 2002, 2004, 2005, 2006, 2007, 2010, 2011, 2013] {
            let op_code = MongoOpCode::from_u32(*code).unwrap();
            assert_eq!(op_code.as_u32(), *code);
        }
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(MongoOpCode::from_u32(2003), None);
        assert_eq!(MongoOpCode::from_u32(0), None);
    }
}
