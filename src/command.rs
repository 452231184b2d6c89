use bson::{Bson, Document};
use serde::Deserialize;

use crate::errors::{DriverError, DriverResult};
use crate::utils::bson_as_i64;
use crate::wire::{Namespace, OpQuery, OpReply};

/// Code servers use for "ns not found".
pub const NAMESPACE_NOT_FOUND_CODE: i32 = 26;
pub const NAMESPACE_NOT_FOUND_MESSAGE: &str = "ns not found";

const UNKNOWN_ERROR_CODE: i32 = -1;

#[derive(Debug, Deserialize)]
struct CommandStatus {
    #[serde(default)]
    ok: Option<Bson>,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    code: Option<Bson>,
}

#[derive(Debug, Deserialize)]
struct QueryFailure {
    #[serde(rename = "$err", default)]
    err: Option<String>,
    #[serde(default)]
    code: Option<Bson>,
}

fn error_code(code: &Option<Bson>) -> i32 {
    code.as_ref()
        .and_then(bson_as_i64)
        .map(|code| code as i32)
        .unwrap_or(UNKNOWN_ERROR_CODE)
}

/// Frames `command` as a single-document query against `<database>.$cmd`.
pub fn command_query(database: &str, command: Document) -> OpQuery {
    OpQuery {
        flags: 0,
        full_collection_name: Namespace::command(database).full_name(),
        number_to_skip: 0,
        number_to_return: -1,
        query: command,
        return_fields_selector: None,
    }
}

/// Maps the reply flags of a query or get-more to an error, if any is raised.
pub fn check_reply_flags(reply: &OpReply, cursor_id: i64) -> DriverResult<()> {
    let flags = reply.flags();
    if flags.cursor_not_found {
        return Err(DriverError::CursorNotFound(cursor_id));
    }
    if flags.query_failure {
        let failure = match reply.documents.first() {
            Some(document) => bson::from_document::<QueryFailure>(document.clone())?,
            None => QueryFailure {
                err: None,
                code: None,
            },
        };
        return Err(DriverError::Command {
            code: error_code(&failure.code),
            message: failure.err.unwrap_or_else(|| "query failure".to_string()),
        });
    }
    Ok(())
}

/// Takes the single document of a command reply and checks its `ok` field.
pub fn check_command_reply(mut reply: OpReply) -> DriverResult<Document> {
    check_reply_flags(&reply, 0)?;
    if reply.documents.is_empty() {
        return Err(DriverError::FrameCorruption(
            "command reply carries no document".to_string(),
        ));
    }
    let document = reply.documents.swap_remove(0);
    let status: CommandStatus = bson::from_document(document.clone())?;
    let ok = match &status.ok {
        Some(Bson::Boolean(ok)) => *ok,
        Some(value) => bson_as_i64(value) == Some(1),
        None => false,
    };
    if ok {
        Ok(document)
    } else {
        Err(DriverError::Command {
            code: error_code(&status.code),
            message: status.errmsg.unwrap_or_else(|| "command failed".to_string()),
        })
    }
}

pub fn is_namespace_not_found(error: &DriverError) -> bool {
    match error {
        DriverError::Command { code, message } => {
            *code == NAMESPACE_NOT_FOUND_CODE || message == NAMESPACE_NOT_FOUND_MESSAGE
        }
        _ => false,
    }
}
