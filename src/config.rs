use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{DriverError, DriverResult};
use crate::write_concern::WriteConcern;

pub const MONGO_ENDPOINT: &str = "127.0.0.1:27017";
pub const DEFAULT_PORT: u16 = 27017;

const CONNECTION_STRING_SCHEME: &str = "mongodb://";

const DEFAULT_CONNECTIONS_PER_HOST: usize = 1;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_AWAIT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: &str, port: u16) -> ServerAddress {
        ServerAddress {
            host: host.to_string(),
            port,
        }
    }

    pub fn resolve(&self) -> DriverResult<Vec<SocketAddr>> {
        let addresses: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();
        if addresses.is_empty() {
            return Err(DriverError::Configuration(format!(
                "host {} resolved to no address",
                self
            )));
        }
        Ok(addresses)
    }
}

impl FromStr for ServerAddress {
    type Err = DriverError;

    fn from_str(endpoint: &str) -> DriverResult<ServerAddress> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(DriverError::Configuration("empty host".to_string()));
        }
        match endpoint.rfind(':') {
            None => Ok(ServerAddress::new(endpoint, DEFAULT_PORT)),
            Some(index) => {
                let host = &endpoint[..index];
                let port = &endpoint[index + 1..];
                if host.is_empty() {
                    return Err(DriverError::Configuration(format!(
                        "missing host name in {}",
                        endpoint
                    )));
                }
                let port = port.parse::<u16>().map_err(|_| {
                    DriverError::Configuration(format!("invalid port in {}", endpoint))
                })?;
                Ok(ServerAddress::new(host, port))
            }
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses `host[:port][,host[:port]...]`, optionally prefixed by `mongodb://`.
pub fn parse_hosts(hosts: &str) -> DriverResult<Vec<ServerAddress>> {
    let hosts = hosts.trim();
    let hosts = if hosts.starts_with(CONNECTION_STRING_SCHEME) {
        let rest = &hosts[CONNECTION_STRING_SCHEME.len()..];
        rest.split('/').next().unwrap_or("")
    } else {
        hosts
    };
    let addresses = hosts
        .split(',')
        .map(ServerAddress::from_str)
        .collect::<DriverResult<Vec<ServerAddress>>>()?;
    Ok(addresses)
}

#[derive(Debug, Clone)]
pub struct ClientConfiguration {
    pub hosts: Vec<ServerAddress>,
    pub connections_per_host: usize,
    pub connect_timeout: Duration,
    pub await_open_timeout: Duration,
    /// Documents per batch requested on queries and get-mores, 0 lets the server decide.
    pub batch_size: i32,
    pub write_concern: WriteConcern,
}

impl Default for ClientConfiguration {
    fn default() -> ClientConfiguration {
        ClientConfiguration {
            hosts: vec![],
            connections_per_host: DEFAULT_CONNECTIONS_PER_HOST,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            await_open_timeout: DEFAULT_AWAIT_OPEN_TIMEOUT,
            batch_size: 0,
            write_concern: WriteConcern::Acknowledged,
        }
    }
}

impl ClientConfiguration {
    pub fn validate(&self) -> DriverResult<()> {
        if self.hosts.is_empty() {
            return Err(DriverError::Configuration("no hosts configured".to_string()));
        }
        if self.connections_per_host == 0 {
            return Err(DriverError::Configuration(
                "connections_per_host must be at least 1".to_string(),
            ));
        }
        if self.batch_size < 0 {
            return Err(DriverError::Configuration(
                "batch_size must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn describe_hosts(&self) -> String {
        self.hosts
            .iter()
            .map(|host| host.to_string())
            .collect::<Vec<String>>()
            .join(",")
    }
}
