use crate::wire::error::{WireError, WireResult};
use crate::wire::utils::{
    ensure_consumed, parse_i32, parse_i64, parse_u32, serialize_i32, serialize_i64, serialize_u32,
};

/// @see https://docs.mongodb.com/manual/reference/mongodb-wire-protocol/#op-kill-cursors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpKillCursors {
    // sequence of cursorIDs to close
    pub cursor_ids: Vec<i64>,
}

pub fn parse_op_kill_cursors(buffer: &[u8]) -> WireResult<OpKillCursors> {
    let (_zero, next_buffer) = parse_u32(buffer)?;
    let (number_of_cursor_ids, mut next_buffer) = parse_i32(next_buffer)?;
    if number_of_cursor_ids < 0 {
        return Err(WireError::NegativeCount(number_of_cursor_ids));
    }
    let mut cursor_ids = Vec::new();
    for _ in 0..number_of_cursor_ids {
        let (cursor_id, rest_buffer) = parse_i64(next_buffer)?;
        cursor_ids.push(cursor_id);
        next_buffer = rest_buffer;
    }
    ensure_consumed(next_buffer)?;
    Ok(OpKillCursors { cursor_ids })
}

pub fn serialize_op_kill_cursors(buffer: &mut Vec<u8>, op: &OpKillCursors) -> WireResult<()> {
    serialize_u32(buffer, 0);
    serialize_i32(buffer, op.cursor_ids.len() as i32);
    for cursor_id in &op.cursor_ids {
        serialize_i64(buffer, *cursor_id);
    }
    Ok(())
}
