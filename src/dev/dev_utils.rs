//! In-process stand-in for a database server, speaking the legacy wire
//! protocol well enough to drive the client end to end in tests.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use bson::{doc, Bson, Document};
use log::{debug, info, warn};
use parking_lot::Mutex;

use libmongowire::wire::ops::op_reply::serialize_op_reply_response_flags;
use libmongowire::wire::{
    parse_frame, serialize_frame, MongoOp, Namespace, OpReply, OpReplyResponseFlags,
    MAX_MESSAGE_SIZE, MSG_HEADER_SIZE,
};

mod commands;
mod store;

use crate::commands::{asks_for_last_error, run_command, run_query, Session};
pub use crate::store::{Store, StoreError, DEFAULT_BATCH_SIZE};

/// Handle on a running mock server. The server lives until the process exits.
pub struct MockServer {
    address: SocketAddr,
    store: Arc<Mutex<Store>>,
}

impl MockServer {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// `host:port` string to hand to `Client::set_hosts`.
    pub fn endpoint(&self) -> String {
        self.address.to_string()
    }

    /// Server cursors not yet exhausted or killed.
    pub fn open_cursors(&self) -> usize {
        self.store.lock().open_cursors()
    }
}

pub fn launch_db(project_name: &str) -> io::Result<MockServer> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let address = listener.local_addr()?;
    info!("{}: mock server listening on {}", project_name, address);
    let store = Arc::new(Mutex::new(Store::new()));
    let shared = Arc::clone(&store);
    thread::Builder::new()
        .name(format!("{}-accept", project_name))
        .spawn(move || accept_connections(listener, shared))?;
    Ok(MockServer { address, store })
}

fn accept_connections(listener: TcpListener, store: Arc<Mutex<Store>>) {
    for stream in listener.incoming() {
        match stream {
            Err(error) => {
                warn!("mock server stopped accepting: {}", error);
                return;
            }
            Ok(stream) => {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let peer = stream.peer_addr().ok();
                    if let Err(error) = serve_connection(stream, store) {
                        debug!("mock connection {:?} ended: {}", peer, error);
                    }
                });
            }
        }
    }
}

fn read_frame(stream: &mut TcpStream) -> io::Result<Option<Vec<u8>>> {
    let mut length_bytes = [0u8; 4];
    match stream.read_exact(&mut length_bytes) {
        Ok(()) => {}
        Err(ref error) if error.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error),
    }
    let length = u32::from_le_bytes(length_bytes);
    if (length as usize) < MSG_HEADER_SIZE || length > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("frame length {} out of bounds", length),
        ));
    }
    let mut frame = vec![0u8; length as usize];
    frame[..4].copy_from_slice(&length_bytes);
    stream.read_exact(&mut frame[4..])?;
    Ok(Some(frame))
}

fn serve_connection(mut stream: TcpStream, store: Arc<Mutex<Store>>) -> io::Result<()> {
    let mut session = Session::default();
    let mut next_request_id = 0u32;
    while let Some(frame) = read_frame(&mut stream)? {
        let (header, op) = parse_frame(&frame)
            .map_err(|error| io::Error::new(ErrorKind::InvalidData, error.to_string()))?;
        let reply = {
            let mut store = store.lock();
            handle_op(&mut store, &mut session, op)
        };
        if let Some(reply) = reply {
            next_request_id = next_request_id.wrapping_add(1);
            let bytes = serialize_frame(next_request_id, header.request_id, &MongoOp::Reply(reply))
                .map_err(|error| io::Error::new(ErrorKind::InvalidData, error.to_string()))?;
            stream.write_all(&bytes)?;
            stream.flush()?;
        }
    }
    Ok(())
}

fn reply(cursor_id: i64, documents: Vec<Document>) -> OpReply {
    OpReply {
        response_flags: 0,
        cursor_id,
        starting_from: 0,
        documents,
    }
}

fn flagged_reply(flags: OpReplyResponseFlags, documents: Vec<Document>) -> OpReply {
    OpReply {
        response_flags: serialize_op_reply_response_flags(&flags),
        cursor_id: 0,
        starting_from: 0,
        documents,
    }
}

fn query_failure(error: StoreError) -> OpReply {
    flagged_reply(
        OpReplyResponseFlags {
            query_failure: true,
            ..Default::default()
        },
        vec![doc! { "$err": error.message, "code": error.code }],
    )
}

fn write_outcome(result: Result<Document, StoreError>) -> Document {
    match result {
        Ok(outcome) => outcome,
        Err(error) => doc! { "err": error.message, "code": error.code, "n": 0 },
    }
}

/// Answers one decoded op. Writes record their outcome in the session and
/// produce no reply, like a real server; any other request clears it.
fn handle_op(store: &mut Store, session: &mut Session, op: MongoOp) -> Option<OpReply> {
    if !asks_for_last_error(&op) {
        session.reset();
    }
    match op {
        MongoOp::Query(query) => {
            let namespace = match Namespace::parse(&query.full_collection_name) {
                Some(namespace) => namespace,
                None => {
                    return Some(query_failure(StoreError::new(
                        store::BAD_VALUE_CODE,
                        format!("invalid namespace {}", query.full_collection_name),
                    )))
                }
            };
            if namespace.is_command() {
                let result = run_command(store, session, &namespace.database, &query.query);
                return Some(reply(0, vec![result]));
            }
            let found = run_query(
                store,
                &query.full_collection_name,
                &query.query,
                query.return_fields_selector.as_ref(),
                query.number_to_skip,
            );
            Some(match found {
                Ok(documents) => {
                    let (cursor_id, batch) = store.open_cursor(documents, query.number_to_return);
                    reply(cursor_id, batch)
                }
                Err(error) => query_failure(error),
            })
        }
        MongoOp::GetMore(get_more) => {
            Some(match store.get_more(get_more.cursor_id, get_more.number_to_return) {
                Some((cursor_id, batch)) => reply(cursor_id, batch),
                None => flagged_reply(
                    OpReplyResponseFlags {
                        cursor_not_found: true,
                        ..Default::default()
                    },
                    vec![],
                ),
            })
        }
        MongoOp::KillCursors(kill) => {
            store.kill_cursors(&kill.cursor_ids);
            None
        }
        MongoOp::Insert(insert) => {
            let result = store
                .insert(&insert.full_collection_name, insert.documents)
                .map(|_| doc! { "err": Bson::Null, "n": 0 });
            session.last_error = write_outcome(result);
            None
        }
        MongoOp::Update(update) => {
            let result = store
                .update(
                    &update.full_collection_name,
                    &update.selector,
                    &update.update,
                    update.upsert(),
                    update.multi_update(),
                )
                .map(|outcome| {
                    let mut last_error = doc! {
                        "err": Bson::Null,
                        "n": outcome.n,
                        "updatedExisting": outcome.updated_existing,
                    };
                    if let Some(id) = outcome.upserted {
                        last_error.insert("upserted", id);
                    }
                    last_error
                });
            session.last_error = write_outcome(result);
            None
        }
        MongoOp::Delete(delete) => {
            let result = store
                .delete(&delete.full_collection_name, &delete.selector, delete.single_remove())
                .map(|n| doc! { "err": Bson::Null, "n": n });
            session.last_error = write_outcome(result);
            None
        }
        MongoOp::Reply(_) => {
            warn!("mock server ignoring a reply frame sent by a client");
            None
        }
    }
}
