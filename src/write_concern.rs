use bson::{doc, Bson, Document};
use serde::Deserialize;

use crate::errors::{DriverError, DriverResult};
use crate::utils::bson_as_i64;

/// Server codes reporting that an index exists under the same name with other keys or options.
/// Code 68 (same keys under another name) is not one of them.
pub const INDEX_CONFLICT_CODES: [i32; 2] = [85, 86];

const UNKNOWN_ERROR_CODE: i32 = -1;

/// Whether legacy writes are followed by a `getLastError` round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    /// Fire-and-forget: the write frame is sent and nothing is awaited.
    Unacknowledged,
    Acknowledged,
}

impl WriteConcern {
    pub fn is_acknowledged(self) -> bool {
        self == WriteConcern::Acknowledged
    }
}

pub fn get_last_error_command() -> Document {
    doc! { "getlasterror": 1 }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    pub acknowledged: bool,
    /// Documents inserted, matched or removed, as reported by the server.
    pub n: i64,
    pub updated_existing: bool,
    pub upserted: Option<Bson>,
}

impl WriteResult {
    pub fn unacknowledged() -> WriteResult {
        WriteResult::default()
    }
}

#[derive(Debug, Deserialize)]
struct LastError {
    #[serde(default)]
    err: Option<String>,
    #[serde(default)]
    code: Option<Bson>,
    #[serde(default)]
    n: Option<Bson>,
    #[serde(rename = "updatedExisting", default)]
    updated_existing: Option<bool>,
    #[serde(default)]
    upserted: Option<Bson>,
}

/// Interprets a `getLastError` reply, turning a reported `err` into a typed failure.
pub fn parse_last_error(reply: Document) -> DriverResult<WriteResult> {
    let last_error: LastError = bson::from_document(reply)?;
    if let Some(message) = last_error.err {
        let code = last_error
            .code
            .as_ref()
            .and_then(bson_as_i64)
            .map(|code| code as i32)
            .unwrap_or(UNKNOWN_ERROR_CODE);
        if INDEX_CONFLICT_CODES.contains(&code) {
            return Err(DriverError::IndexConflict { code, message });
        }
        return Err(DriverError::Write { code, message });
    }
    Ok(WriteResult {
        acknowledged: true,
        n: last_error.n.as_ref().and_then(bson_as_i64).unwrap_or(0),
        updated_existing: last_error.updated_existing.unwrap_or(false),
        upserted: last_error.upserted,
    })
}

#[cfg(test)]
mod write_concern_tests {
    use super::*;

    #[test]
    fn test_clean_last_error() {
        let reply = doc! {
            "connectionId": 4,
            "n": 1,
            "updatedExisting": true,
            "err": Bson::Null,
            "ok": 1.0,
        };
        let result = parse_last_error(reply).unwrap();
        assert!(result.acknowledged);
        assert_eq!(result.n, 1);
        assert!(result.updated_existing);
        assert_eq!(result.upserted, None);
    }

    #[test]
    fn test_upserted_last_error() {
        let reply = doc! { "n": 1, "updatedExisting": false, "upserted": 120, "ok": 1 };
        let result = parse_last_error(reply).unwrap();
        assert_eq!(result.upserted, Some(Bson::Int32(120)));
    }

    #[test]
    fn test_duplicate_key_is_write_error() {
        let reply = doc! {
            "err": "E11000 duplicate key error index: test.client.$_id_",
            "code": 11000,
            "n": 0,
            "ok": 1.0,
        };
        match parse_last_error(reply) {
            Err(DriverError::Write { code, message }) => {
                assert_eq!(code, 11000);
                assert!(message.starts_with("E11000"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_index_conflict_code() {
        let reply = doc! { "err": "Index with name: name_ already exists", "code": 85.0 };
        match parse_last_error(reply) {
            Err(DriverError::IndexConflict { code, .. }) => assert_eq!(code, 85),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_index_already_exists_is_not_a_name_conflict() {
        let reply = doc! { "err": "index already exists with a different name", "code": 68 };
        match parse_last_error(reply) {
            Err(DriverError::Write { code, .. }) => assert_eq!(code, 68),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
