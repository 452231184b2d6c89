//! Binary frames of the legacy wire protocol.
//!
//! Every frame starts with a 16-byte [`MsgHeader`](ops::msg_header::MsgHeader)
//! followed by an op-specific body. All integers are little-endian, namestrings
//! are zero-terminated and documents use the bson binary layout. Commands are
//! plain OP_QUERY frames sent to `<database>.$cmd`.

pub mod error;
pub mod namespace;
pub mod ops;
pub mod parser;
pub mod serializer;
pub mod utils;

pub use error::{WireError, WireResult};
pub use namespace::Namespace;
pub use ops::msg_header::{MsgHeader, MSG_HEADER_SIZE};
pub use ops::op::MongoOp;
pub use ops::op_delete::OpDelete;
pub use ops::op_get_more::OpGetMore;
pub use ops::op_insert::OpInsert;
pub use ops::op_kill_cursors::OpKillCursors;
pub use ops::op_query::OpQuery;
pub use ops::op_reply::{OpReply, OpReplyResponseFlags};
pub use ops::op_update::OpUpdate;
pub use ops::opcodes::MongoOpCode;
pub use parser::parse_frame;
pub use serializer::serialize_frame;

/// Frames larger than this are treated as corrupt.
pub const MAX_MESSAGE_SIZE: u32 = 48 * 1000 * 1000;

#[cfg(test)]
mod wire_tests {
    use bson::doc;

    use super::*;

    #[test]
    fn test_command_query_is_byte_exact() {
        let op = MongoOp::Query(OpQuery {
            flags: 0,
            full_collection_name: Namespace::command("admin").full_name(),
            number_to_skip: 0,
            number_to_return: -1,
            query: doc! { "isMaster": 1 },
            return_fields_selector: None,
        });
        let frame = serialize_frame(1, 0, &op).unwrap();
        let expected: Vec<u8> = vec![
            0x3a, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xd4, 0x07,
            0x00, 0x00, // header
            0x00, 0x00, 0x00, 0x00, // flags
            0x61, 0x64, 0x6d, 0x69, 0x6e, 0x2e, 0x24, 0x63, 0x6d, 0x64, 0x00, // admin.$cmd
            0x00, 0x00, 0x00, 0x00, // skip
            0xff, 0xff, 0xff, 0xff, // return
            0x13, 0x00, 0x00, 0x00, 0x10, 0x69, 0x73, 0x4d, 0x61, 0x73, 0x74, 0x65, 0x72, 0x00,
            0x01, 0x00, 0x00, 0x00, 0x00, // { isMaster: 1 }
        ];
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_frame_round_trip_keeps_document_order() {
        let document = doc! {
            "_id": 7,
            "name": "name-7",
            "tags": ["a", "b"],
            "nested": { "z": 1.5, "a": true, "n": null },
        };
        let op = MongoOp::Insert(OpInsert {
            flags: 0,
            full_collection_name: "test.client".to_string(),
            documents: vec![document.clone()],
        });
        let frame = serialize_frame(42, 0, &op).unwrap();
        let (header, parsed) = parse_frame(&frame).unwrap();
        assert_eq!(header.request_id, 42);
        assert_eq!(header.message_length as usize, frame.len());
        assert_eq!(header.op_code, MongoOpCode::OpInsert);
        match parsed {
            MongoOp::Insert(insert) => {
                assert_eq!(insert.documents.len(), 1);
                let keys: Vec<&String> = insert.documents[0].keys().collect();
                assert_eq!(keys, vec!["_id", "name", "tags", "nested"]);
                assert_eq!(insert.documents[0], document);
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_reply_round_trip() {
        let reply = MongoOp::Reply(OpReply {
            response_flags: 0,
            cursor_id: 0x1122_3344_5566,
            starting_from: 10,
            documents: vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
        });
        let frame = serialize_frame(3, 17, &reply).unwrap();
        let (header, parsed) = parse_frame(&frame).unwrap();
        assert_eq!(header.response_to, 17);
        assert_eq!(parsed, reply);
    }

    #[test]
    fn test_update_and_delete_flags() {
        let mut update = OpUpdate {
            full_collection_name: "test.client".to_string(),
            flags: 0,
            selector: doc! { "_id": 1 },
            update: doc! { "$set": { "name": "x" } },
        };
        update.set_upsert(true);
        assert!(update.upsert());
        assert!(!update.multi_update());
        let frame = serialize_frame(5, 0, &MongoOp::Update(update.clone())).unwrap();
        assert_eq!(parse_frame(&frame).unwrap().1, MongoOp::Update(update));

        let mut delete = OpDelete {
            full_collection_name: "test.client".to_string(),
            flags: 0,
            selector: doc! {},
        };
        delete.set_single_remove(true);
        assert_eq!(delete.flags, 1);
    }

    #[test]
    fn test_length_mismatch_is_detected() {
        let op = MongoOp::GetMore(OpGetMore {
            full_collection_name: "test.client".to_string(),
            number_to_return: 0,
            cursor_id: 99,
        });
        let mut frame = serialize_frame(8, 0, &op).unwrap();
        frame.push(0);
        match parse_frame(&frame) {
            Err(WireError::FrameLengthMismatch { declared, actual }) => {
                assert_eq!(declared as usize + 1, actual);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_kill_cursors_layout() {
        let op = MongoOp::KillCursors(OpKillCursors {
            cursor_ids: vec![5, 6],
        });
        let frame = serialize_frame(2, 0, &op).unwrap();
        assert_eq!(frame.len(), MSG_HEADER_SIZE + 4 + 4 + 16);
        assert_eq!(&frame[20..24], &2i32.to_le_bytes());
        assert_eq!(parse_frame(&frame).unwrap().1, op);
    }

    #[test]
    fn test_reply_frame_with_huge_count_and_no_body_fails() {
        let op = MongoOp::Reply(OpReply {
            response_flags: 0,
            cursor_id: 0,
            starting_from: 0,
            documents: vec![],
        });
        let mut frame = serialize_frame(3, 1, &op).unwrap();
        let count_offset = MSG_HEADER_SIZE + 16;
        frame[count_offset..count_offset + 4].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(parse_frame(&frame).is_err());
    }

    #[test]
    fn test_kill_cursors_with_huge_count_fails() {
        let op = MongoOp::KillCursors(OpKillCursors { cursor_ids: vec![] });
        let mut frame = serialize_frame(4, 0, &op).unwrap();
        frame[20..24].copy_from_slice(&i32::MAX.to_le_bytes());
        match parse_frame(&frame) {
            Err(WireError::NotEnoughBufferSize { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }
}
