use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::collection::Collection;
use crate::config::{parse_hosts, ClientConfiguration, ServerAddress};
use crate::connection::Connection;
use crate::errors::{DriverError, DriverResult};
use crate::write_concern::WriteConcern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configured,
    Started,
    Closed,
}

struct ClientState {
    config: ClientConfiguration,
    phase: Phase,
    connections: Vec<Arc<Connection>>,
    attempts_in_flight: usize,
    // bumped on every open so late connects from an earlier open are discarded
    generation: u64,
}

struct ClientInner {
    state: Mutex<ClientState>,
    changed: Condvar,
    next_connection: AtomicUsize,
}

/// Entry point of the driver: a pool of connections over the configured hosts.
///
/// Cloning is cheap and every clone shares the same pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Client {
        Client::with_configuration(ClientConfiguration::default())
    }
}

impl Client {
    pub fn new() -> Client {
        Client::default()
    }

    pub fn with_configuration(config: ClientConfiguration) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                state: Mutex::new(ClientState {
                    config,
                    phase: Phase::Configured,
                    connections: vec![],
                    attempts_in_flight: 0,
                    generation: 0,
                }),
                changed: Condvar::new(),
                next_connection: AtomicUsize::new(0),
            }),
        }
    }

    /// Replaces the host list; `hosts` is `host[:port]` separated by commas.
    pub fn set_hosts(&self, hosts: &str) -> DriverResult<()> {
        self.set_host_list(parse_hosts(hosts)?)
    }

    pub fn set_host_list(&self, hosts: Vec<ServerAddress>) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Started {
            return Err(DriverError::Configuration(
                "hosts cannot change on an open client".to_string(),
            ));
        }
        state.config.hosts = hosts;
        Ok(())
    }

    pub fn configuration(&self) -> ClientConfiguration {
        self.inner.state.lock().config.clone()
    }

    /// Starts connecting to every configured host in the background.
    pub fn open(&self) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Started {
            return Ok(());
        }
        state.config.validate()?;
        state.phase = Phase::Started;
        state.generation += 1;
        state.attempts_in_flight = 0;
        let generation = state.generation;
        info!("opening client to {}", state.config.describe_hosts());

        let hosts = state.config.hosts.clone();
        let connections_per_host = state.config.connections_per_host;
        let timeout = state.config.connect_timeout;
        for host in hosts {
            for _ in 0..connections_per_host {
                state.attempts_in_flight += 1;
                let inner = Arc::clone(&self.inner);
                let target = host.clone();
                let spawned = thread::Builder::new()
                    .name(format!("mongowire-connect-{}", host))
                    .spawn(move || {
                        let result = Connection::connect(&target, timeout).and_then(|connection| {
                            connection.handshake()?;
                            Ok(connection)
                        });
                        inner.finish_attempt(generation, &target, result);
                    });
                if let Err(error) = spawned {
                    state.attempts_in_flight -= 1;
                    warn!("cannot spawn connect thread for {}: {}", host, error);
                }
            }
        }
        Ok(())
    }

    /// Opens the client if needed and blocks until a connection completed its
    /// handshake, or fails once the await-open timeout elapses.
    pub fn await_open(&self) -> DriverResult<()> {
        self.open()?;
        let mut state = self.inner.state.lock();
        let timeout = state.config.await_open_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if state.phase != Phase::Started {
                return Err(DriverError::ConnectionClosed);
            }
            if state.connections.iter().any(|connection| connection.is_open()) {
                return Ok(());
            }
            if state.attempts_in_flight == 0 {
                break;
            }
            if self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Err(DriverError::ConnectionTimeout {
            hosts: state.config.describe_hosts(),
            timeout,
        })
    }

    pub fn is_open(&self) -> bool {
        let state = self.inner.state.lock();
        state.phase == Phase::Started
            && state.connections.iter().any(|connection| connection.is_open())
    }

    /// Tears down every connection. Idempotent.
    pub fn close(&self) {
        let connections = {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Started {
                info!("closing client to {}", state.config.describe_hosts());
            }
            state.phase = Phase::Closed;
            std::mem::replace(&mut state.connections, vec![])
        };
        self.inner.changed.notify_all();
        for connection in connections {
            connection.close();
        }
    }

    pub fn get_collection(&self, database: &str, name: &str) -> Collection {
        Collection::new(self.clone(), database, name)
    }

    /// Picks the next healthy connection, round-robin, dropping dead ones.
    pub fn checkout(&self) -> DriverResult<Arc<Connection>> {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Started {
            return Err(DriverError::ConnectionClosed);
        }
        state.connections.retain(|connection| {
            if !connection.is_open() {
                debug!("pruning closed connection {}", connection.id());
            }
            connection.is_open()
        });
        if state.connections.is_empty() {
            return Err(DriverError::ConnectionClosed);
        }
        let index = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::clone(&state.connections[index % state.connections.len()]))
    }

    pub fn batch_size(&self) -> i32 {
        self.inner.state.lock().config.batch_size
    }

    pub fn write_concern(&self) -> WriteConcern {
        self.inner.state.lock().config.write_concern
    }
}

impl ClientInner {
    fn finish_attempt(
        &self,
        generation: u64,
        host: &ServerAddress,
        result: DriverResult<Connection>,
    ) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.attempts_in_flight -= 1;
        }
        match result {
            Ok(connection) => {
                if state.generation == generation && state.phase == Phase::Started {
                    debug!("connection {} to {} ready", connection.id(), host);
                    state.connections.push(Arc::new(connection));
                } else {
                    drop(state);
                    connection.close();
                    self.changed.notify_all();
                    return;
                }
            }
            Err(error) => warn!("cannot open connection to {}: {}", host, error),
        }
        drop(state);
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod client_tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_get_collection_does_not_touch_network() {
        let client = Client::new();
        let collection = client.get_collection("test", "client");
        assert_eq!(collection.full_name(), "test.client");
        assert!(!client.is_open());
    }

    #[test]
    fn test_open_without_hosts_is_configuration_error() {
        let client = Client::new();
        match client.open() {
            Err(DriverError::Configuration(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_await_open_times_out() {
        // accepts connections but never answers the handshake
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let mut held = vec![];
            for stream in listener.incoming() {
                held.push(stream);
            }
        });
        let mut config = ClientConfiguration::default();
        config.await_open_timeout = Duration::from_millis(200);
        let client = Client::with_configuration(config);
        client.set_hosts(&format!("127.0.0.1:{}", port)).unwrap();
        match client.await_open() {
            Err(DriverError::ConnectionTimeout { timeout, .. }) => {
                assert_eq!(timeout, Duration::from_millis(200))
            }
            other => panic!("unexpected result {:?}", other),
        }
        match client.set_hosts("127.0.0.1:1") {
            Err(DriverError::Configuration(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        client.close();
        client.close();
        assert!(!client.is_open());
        assert!(client.set_hosts("127.0.0.1:1").is_ok());
    }

    #[test]
    fn test_await_open_fails_when_every_host_refuses() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let client = Client::new();
        client.set_hosts(&format!("127.0.0.1:{}", port)).unwrap();
        match client.await_open() {
            Err(DriverError::ConnectionTimeout { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!client.is_open());
        client.close();
    }

    #[test]
    fn test_checkout_on_closed_client() {
        let client = Client::new();
        match client.checkout() {
            Err(DriverError::ConnectionClosed) => {}
            other => panic!("unexpected result {:?}", other.map(|c| c.id())),
        }
    }
}
