//! One channel to a server.
//!
//! Writes go through a single mutex-guarded stream. A dedicated reader thread
//! owns the read half, decodes every incoming frame and hands each reply to the
//! caller registered under its `responseTo` id, so callers waiting on their own
//! reply never consume somebody else's. Any read or decode failure closes the
//! connection and fails every registered caller.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bson::{doc, Document};
use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::command::{check_command_reply, command_query};
use crate::config::ServerAddress;
use crate::errors::{DriverError, DriverResult};
use crate::utils::hex_dump;
use crate::wire::{
    parse_frame, serialize_frame, MongoOp, OpQuery, OpReply, MAX_MESSAGE_SIZE, MSG_HEADER_SIZE,
};
use crate::write_concern::{get_last_error_command, parse_last_error, WriteResult};

static NEXT_CONNECTION_ID: AtomicUsize = AtomicUsize::new(1);

type ReplySlot = SyncSender<DriverResult<OpReply>>;

#[derive(Debug, Clone)]
enum ChannelFault {
    Closed,
    Corrupt(String),
}

impl ChannelFault {
    fn to_error(&self) -> DriverError {
        match self {
            ChannelFault::Closed => DriverError::ConnectionClosed,
            ChannelFault::Corrupt(reason) => DriverError::FrameCorruption(reason.clone()),
        }
    }
}

/// State touched by both caller threads and the reader thread.
struct Channel {
    id: usize,
    open: AtomicBool,
    pending: Mutex<HashMap<u32, ReplySlot>>,
    socket: TcpStream,
}

impl Channel {
    fn register(&self, request_id: u32, slot: ReplySlot) -> DriverResult<()> {
        let mut pending = self.pending.lock();
        if !self.open.load(Ordering::SeqCst) {
            return Err(DriverError::ConnectionClosed);
        }
        pending.insert(request_id, slot);
        Ok(())
    }

    fn unregister(&self, request_id: u32) {
        self.pending.lock().remove(&request_id);
    }

    fn deliver(&self, response_to: u32, reply: OpReply) {
        let slot = self.pending.lock().remove(&response_to);
        match slot {
            Some(slot) => {
                // the caller may have given up; nothing to do then
                let _ = slot.send(Ok(reply));
            }
            None => debug!(
                "connection {}: dropping reply to unknown request {}",
                self.id, response_to
            ),
        }
    }

    /// Marks the channel closed and fails every caller still waiting.
    fn fail(&self, fault: ChannelFault) {
        let drained: Vec<ReplySlot> = {
            let mut pending = self.pending.lock();
            self.open.store(false, Ordering::SeqCst);
            pending.drain().map(|(_, slot)| slot).collect()
        };
        if !drained.is_empty() {
            debug!(
                "connection {}: failing {} pending requests ({:?})",
                self.id,
                drained.len(),
                fault
            );
        }
        for slot in drained {
            let _ = slot.send(Err(fault.to_error()));
        }
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

pub fn allocate_request_id(counter: &AtomicU32) -> u32 {
    loop {
        // fetch_add wraps at u32::MAX; zero is skipped since replies use it as "none"
        let request_id = counter.fetch_add(1, Ordering::SeqCst);
        if request_id != 0 {
            return request_id;
        }
    }
}

pub struct Connection {
    address: ServerAddress,
    channel: Arc<Channel>,
    next_request_id: AtomicU32,
    writer: Mutex<TcpStream>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn connect(address: &ServerAddress, timeout: Duration) -> DriverResult<Connection> {
        let mut last_error = None;
        for socket_address in address.resolve()? {
            match TcpStream::connect_timeout(&socket_address, timeout) {
                Ok(stream) => return Connection::from_stream(address.clone(), stream),
                Err(error) => {
                    debug!("connecting to {} failed: {}", socket_address, error);
                    last_error = Some(error);
                }
            }
        }
        match last_error {
            Some(error) => Err(error.into()),
            None => Err(DriverError::ConnectionClosed),
        }
    }

    pub fn from_stream(address: ServerAddress, stream: TcpStream) -> DriverResult<Connection> {
        stream.set_nodelay(true)?;
        let read_half = stream.try_clone()?;
        let socket = stream.try_clone()?;
        let channel = Arc::new(Channel {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst),
            open: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
            socket,
        });
        let reader_channel = Arc::clone(&channel);
        let reader = thread::Builder::new()
            .name(format!("mongowire-reader-{}", channel.id))
            .spawn(move || read_loop(read_half, reader_channel))?;
        debug!("connection {} to {} opened", channel.id, address);
        Ok(Connection {
            address,
            channel,
            next_request_id: AtomicU32::new(1),
            writer: Mutex::new(stream),
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn id(&self) -> usize {
        self.channel.id
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.channel.open.load(Ordering::SeqCst)
    }

    fn write_frame(&self, frame: &[u8]) -> DriverResult<()> {
        trace!("connection {} >>\n{}", self.channel.id, hex_dump(frame));
        let mut writer = self.writer.lock();
        let written = writer.write_all(frame).and_then(|_| writer.flush());
        if let Err(error) = written {
            drop(writer);
            warn!("connection {}: write failed: {}", self.channel.id, error);
            self.channel.fail(ChannelFault::Closed);
            return Err(DriverError::ConnectionClosed);
        }
        Ok(())
    }

    /// Sends `op`; blocks for the matching reply when the op expects one.
    pub fn send(&self, op: &MongoOp) -> DriverResult<Option<OpReply>> {
        if !self.is_open() {
            return Err(DriverError::ConnectionClosed);
        }
        let request_id = allocate_request_id(&self.next_request_id);
        let frame = serialize_frame(request_id, 0, op)?;
        if !op.expects_reply() {
            self.write_frame(&frame)?;
            return Ok(None);
        }
        self.exchange(request_id, &frame).map(Some)
    }

    /// Writes `bytes` and waits for the reply to `request_id`, which must be
    /// the last frame in `bytes`.
    fn exchange(&self, request_id: u32, bytes: &[u8]) -> DriverResult<OpReply> {
        let (slot, reply) = sync_channel(1);
        self.channel.register(request_id, slot)?;
        if let Err(error) = self.write_frame(bytes) {
            self.channel.unregister(request_id);
            return Err(error);
        }
        match reply.recv() {
            Ok(result) => result,
            Err(_) => Err(DriverError::ConnectionClosed),
        }
    }

    pub fn query(&self, query: OpQuery) -> DriverResult<OpReply> {
        match self.send(&MongoOp::Query(query))? {
            Some(reply) => Ok(reply),
            None => Err(DriverError::ConnectionClosed),
        }
    }

    /// Runs `command` against `<database>.$cmd` and checks its `ok` field.
    pub fn command(&self, database: &str, command: Document) -> DriverResult<Document> {
        let reply = self.query(command_query(database, command))?;
        check_command_reply(reply)
    }

    /// Sends an insert, update or delete frame, following it with `getLastError`
    /// when `acknowledge_on` names the database to ask.
    ///
    /// Both frames go out in one buffer under the writer lock. The server keeps
    /// a single last-error per connection and resets it on every request, so
    /// nothing else sharing the connection may land between them.
    pub fn write(&self, op: &MongoOp, acknowledge_on: Option<&str>) -> DriverResult<WriteResult> {
        let database = match acknowledge_on {
            None => {
                self.send(op)?;
                return Ok(WriteResult::unacknowledged());
            }
            Some(database) => database,
        };
        if !self.is_open() {
            return Err(DriverError::ConnectionClosed);
        }
        let write_id = allocate_request_id(&self.next_request_id);
        let mut bytes = serialize_frame(write_id, 0, op)?;
        let acknowledge_id = allocate_request_id(&self.next_request_id);
        let acknowledge = MongoOp::Query(command_query(database, get_last_error_command()));
        bytes.extend_from_slice(&serialize_frame(acknowledge_id, 0, &acknowledge)?);
        let reply = self.exchange(acknowledge_id, &bytes)?;
        parse_last_error(check_command_reply(reply)?)
    }

    pub fn handshake(&self) -> DriverResult<Document> {
        let reply = self.command("admin", doc! { "isMaster": 1 })?;
        debug!(
            "connection {} handshake with {}: {:?}",
            self.channel.id,
            self.address,
            reply.get("maxWireVersion")
        );
        Ok(reply)
    }

    /// Closes the channel and fails every caller still waiting on it. Idempotent.
    pub fn close(&self) {
        if self.is_open() {
            debug!("connection {} to {} closing", self.channel.id, self.address);
        }
        self.channel.fail(ChannelFault::Closed);
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if reader.thread().id() != thread::current().id() {
                let _ = reader.join();
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, ChannelFault> {
    let mut length_bytes = [0u8; 4];
    stream
        .read_exact(&mut length_bytes)
        .map_err(|_| ChannelFault::Closed)?;
    let message_length = u32::from_le_bytes(length_bytes);
    if (message_length as usize) < MSG_HEADER_SIZE || message_length > MAX_MESSAGE_SIZE {
        return Err(ChannelFault::Corrupt(format!(
            "declared frame length {} out of bounds",
            message_length
        )));
    }
    let mut frame = vec![0u8; message_length as usize];
    frame[..4].copy_from_slice(&length_bytes);
    stream
        .read_exact(&mut frame[4..])
        .map_err(|_| ChannelFault::Closed)?;
    Ok(frame)
}

fn read_loop(mut stream: TcpStream, channel: Arc<Channel>) {
    loop {
        let frame = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(fault) => {
                if channel.open.load(Ordering::SeqCst) {
                    warn!("connection {}: read failed: {:?}", channel.id, fault);
                }
                channel.fail(fault);
                return;
            }
        };
        trace!("connection {} <<\n{}", channel.id, hex_dump(&frame));
        match parse_frame(&frame) {
            Ok((header, MongoOp::Reply(reply))) => channel.deliver(header.response_to, reply),
            Ok((header, op)) => {
                warn!(
                    "connection {}: server sent unexpected {:?}",
                    channel.id, header.op_code
                );
                channel.fail(ChannelFault::Corrupt(format!(
                    "unexpected {:?} from server",
                    op.op_code()
                )));
                return;
            }
            Err(error) => {
                warn!("connection {}: corrupt frame: {}", channel.id, error);
                channel.fail(ChannelFault::Corrupt(error.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod connection_tests {
    use std::net::TcpListener;
    use std::sync::Barrier;

    use bson::{doc, Bson};

    use super::*;
    use crate::wire::{parse_frame, MongoOp, OpInsert};

    fn read_request(stream: &mut TcpStream) -> (u32, MongoOp) {
        let frame = read_frame(stream).unwrap();
        let (header, op) = parse_frame(&frame).unwrap();
        (header.request_id, op)
    }

    fn write_reply(stream: &mut TcpStream, response_to: u32, documents: Vec<Document>) {
        let reply = MongoOp::Reply(OpReply {
            response_flags: 0,
            cursor_id: 0,
            starting_from: 0,
            documents,
        });
        let frame = serialize_frame(1000 + response_to, response_to, &reply).unwrap();
        stream.write_all(&frame).unwrap();
    }

    fn serve<F>(handler: F) -> ServerAddress
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handler(stream);
        });
        ServerAddress::new("127.0.0.1", port)
    }

    fn ping() -> OpQuery {
        command_query("admin", doc! { "ping": 1 })
    }

    #[test]
    fn test_request_ids_wrap_and_skip_zero() {
        let counter = AtomicU32::new(u32::MAX);
        assert_eq!(allocate_request_id(&counter), u32::MAX);
        assert_eq!(allocate_request_id(&counter), 1);
        assert_eq!(allocate_request_id(&counter), 2);
    }

    #[test]
    fn test_replies_matched_by_response_to() {
        let address = serve(|mut stream| {
            let (first, _) = read_request(&mut stream);
            let (second, _) = read_request(&mut stream);
            write_reply(&mut stream, second, vec![doc! { "for": second as i64, "ok": 1 }]);
            write_reply(&mut stream, first, vec![doc! { "for": first as i64, "ok": 1 }]);
            let mut rest = vec![];
            let _ = stream.read_to_end(&mut rest);
        });
        let connection = Arc::new(Connection::connect(&address, Duration::from_secs(5)).unwrap());
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let connection = Arc::clone(&connection);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    connection.command("admin", doc! { "ping": 1 }).unwrap()
                })
            })
            .collect();
        let mut answered: Vec<i64> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().get_i64("for").unwrap())
            .collect();
        answered.sort();
        assert_eq!(answered, vec![1, 2]);
        connection.close();
    }

    #[test]
    fn test_fire_and_forget_returns_no_reply() {
        let address = serve(|mut stream| {
            let (_, op) = read_request(&mut stream);
            assert!(match op {
                MongoOp::Insert(_) => true,
                _ => false,
            });
            let mut rest = vec![];
            let _ = stream.read_to_end(&mut rest);
        });
        let connection = Connection::connect(&address, Duration::from_secs(5)).unwrap();
        let insert = MongoOp::Insert(OpInsert {
            flags: 0,
            full_collection_name: "test.client".to_string(),
            documents: vec![doc! { "_id": 1 }],
        });
        assert_eq!(connection.send(&insert).unwrap(), None);
        connection.close();
    }

    #[test]
    fn test_corrupt_frame_closes_connection() {
        let address = serve(|mut stream| {
            let (request_id, _) = read_request(&mut stream);
            // declares a reply of 20 bytes but carries a truncated body
            let mut frame = vec![];
            frame.extend_from_slice(&20u32.to_le_bytes());
            frame.extend_from_slice(&7u32.to_le_bytes());
            frame.extend_from_slice(&request_id.to_le_bytes());
            frame.extend_from_slice(&1u32.to_le_bytes());
            frame.extend_from_slice(&[0, 0, 0, 0]);
            stream.write_all(&frame).unwrap();
            let mut rest = vec![];
            let _ = stream.read_to_end(&mut rest);
        });
        let connection = Connection::connect(&address, Duration::from_secs(5)).unwrap();
        match connection.query(ping()) {
            Err(DriverError::FrameCorruption(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!connection.is_open());
        match connection.query(ping()) {
            Err(DriverError::ConnectionClosed) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_hangup_fails_waiting_caller() {
        let address = serve(|mut stream| {
            let _ = read_request(&mut stream);
            drop(stream);
        });
        let connection = Connection::connect(&address, Duration::from_secs(5)).unwrap();
        match connection.query(ping()) {
            Err(DriverError::ConnectionClosed) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!connection.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let address = serve(|mut stream| {
            let mut rest = vec![];
            let _ = stream.read_to_end(&mut rest);
        });
        let connection = Connection::connect(&address, Duration::from_secs(5)).unwrap();
        assert!(connection.is_open());
        connection.close();
        connection.close();
        assert!(!connection.is_open());
        match connection.send(&MongoOp::Query(ping())) {
            Err(DriverError::ConnectionClosed) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_write_error_survives_concurrent_commands() {
        // answers getlasterror with a duplicate-key error only when the frame
        // right before it was the insert, the way a server resets its last error
        let address = serve(|mut stream| {
            let mut after_write = false;
            while let Ok(frame) = read_frame(&mut stream) {
                let (header, op) = parse_frame(&frame).unwrap();
                match op {
                    MongoOp::Insert(_) => after_write = true,
                    MongoOp::Query(query) => {
                        let document = if !query.query.contains_key("getlasterror") {
                            doc! { "ok": 1 }
                        } else if after_write {
                            doc! { "err": "E11000 duplicate key error", "code": 11000, "ok": 1 }
                        } else {
                            doc! { "err": Bson::Null, "n": 0, "ok": 1 }
                        };
                        after_write = false;
                        write_reply(&mut stream, header.request_id, vec![document]);
                    }
                    _ => after_write = false,
                }
            }
        });
        let connection = Arc::new(Connection::connect(&address, Duration::from_secs(5)).unwrap());
        let pingers: Vec<_> = (0..2)
            .map(|_| {
                let connection = Arc::clone(&connection);
                thread::spawn(move || {
                    for _ in 0..50 {
                        connection.command("admin", doc! { "ping": 1 }).unwrap();
                    }
                })
            })
            .collect();
        let insert = MongoOp::Insert(OpInsert {
            flags: 0,
            full_collection_name: "test.client".to_string(),
            documents: vec![doc! { "_id": 1 }],
        });
        for _ in 0..50 {
            match connection.write(&insert, Some("test")) {
                Err(DriverError::Write { code, .. }) => assert_eq!(code, 11000),
                other => panic!("unexpected result {:?}", other),
            }
        }
        for pinger in pingers {
            pinger.join().unwrap();
        }
        connection.close();
    }
}
