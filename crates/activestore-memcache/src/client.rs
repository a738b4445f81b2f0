// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{is_connection_error, Error, Result};
use crate::protocol::{
    read_response, write_request, Request, Response, DEFAULT_DIAL_TIMEOUT, DEFAULT_SOCKET_TIMEOUT,
    INCR_NO_CREATE, OP_ADD, OP_DELETE, OP_FLUSH, OP_GET, OP_INCREMENT, OP_SET, OP_VERSION,
    STATUS_ITEM_NOT_STORED, STATUS_KEY_EXISTS, STATUS_KEY_NOT_FOUND, STATUS_OK,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOption {
    DialTimeout(Duration),
    SocketTimeout(Duration),
}

pub fn with_dial_timeout(timeout: Duration) -> ClientOption {
    ClientOption::DialTimeout(timeout)
}

/// Read and write deadline applied to every round trip.
pub fn with_socket_timeout(timeout: Duration) -> ClientOption {
    ClientOption::SocketTimeout(timeout)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClientConfig {
    dial_timeout: Duration,
    socket_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }
}

impl ClientConfig {
    fn apply(mut self, opts: impl IntoIterator<Item = ClientOption>) -> Self {
        for opt in opts {
            match opt {
                ClientOption::DialTimeout(timeout) => self.dial_timeout = timeout,
                ClientOption::SocketTimeout(timeout) => self.socket_timeout = timeout,
            }
        }
        self
    }
}

/// A stored item as returned by `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: Vec<u8>,
    pub flags: u32,
    pub cas: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasStatus {
    Stored,
    Exists,
    NotFound,
}

/// Synchronous memcached client speaking the binary protocol over one TCP stream.
///
/// Requests are serialised behind a mutex. After a connection-level failure the
/// stream is dropped and the next request dials again.
#[derive(Debug)]
pub struct Client {
    addr: String,
    config: ClientConfig,
    stream: Mutex<Option<TcpStream>>,
    next_opaque: AtomicU32,
}

pub fn dial(addr: &str, opts: impl IntoIterator<Item = ClientOption>) -> Result<Client> {
    let config = ClientConfig::default().apply(opts);
    let stream = connect(addr, &config)?;
    Ok(Client {
        addr: addr.to_string(),
        config,
        stream: Mutex::new(Some(stream)),
        next_opaque: AtomicU32::new(1),
    })
}

fn connect(addr: &str, config: &ClientConfig) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(Error::invalid_request(format!("address {addr} did not resolve")));
    }

    let mut last_err = None;
    for sock_addr in addrs {
        match TcpStream::connect_timeout(&sock_addr, config.dial_timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(config.socket_timeout))?;
                stream.set_write_timeout(Some(config.socket_timeout))?;
                stream.set_nodelay(true)?;
                tracing::debug!(addr = %sock_addr, "memcache connected");
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.map(Error::from).unwrap_or(Error::ClientClosed))
}

impl Client {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Item>> {
        let response = self.send_request(Request::new(OP_GET, key))?;
        match response.status() {
            STATUS_OK => {
                let flags = match response.extras.as_slice() {
                    [a, b, c, d] => u32::from_be_bytes([*a, *b, *c, *d]),
                    [] => 0,
                    other => {
                        return Err(Error::invalid_response(format!(
                            "get extras has {} bytes",
                            other.len()
                        )))
                    }
                };
                Ok(Some(Item {
                    cas: response.cas(),
                    flags,
                    value: response.value,
                }))
            }
            STATUS_KEY_NOT_FOUND => Ok(None),
            _ => Err(status_error(&response)),
        }
    }

    /// Unconditional store. Returns the new cas token.
    pub fn set(&self, key: &[u8], value: &[u8], expiration: u32) -> Result<u64> {
        let request = Request::new(OP_SET, key)
            .with_storage_extras(0, expiration)
            .with_value(value);
        let response = self.send_request(request)?;
        match response.status() {
            STATUS_OK => Ok(response.cas()),
            _ => Err(status_error(&response)),
        }
    }

    /// Store only if the key does not exist yet.
    pub fn add(&self, key: &[u8], value: &[u8], expiration: u32) -> Result<bool> {
        let request = Request::new(OP_ADD, key)
            .with_storage_extras(0, expiration)
            .with_value(value);
        let response = self.send_request(request)?;
        match response.status() {
            STATUS_OK => Ok(true),
            STATUS_KEY_EXISTS | STATUS_ITEM_NOT_STORED => Ok(false),
            _ => Err(status_error(&response)),
        }
    }

    /// Store only if the item still carries the `cas` token read earlier.
    pub fn cas(&self, key: &[u8], value: &[u8], expiration: u32, cas: u64) -> Result<CasStatus> {
        if cas == 0 {
            return Err(Error::invalid_request("cas token must be non-zero"));
        }
        let request = Request::new(OP_SET, key)
            .with_storage_extras(0, expiration)
            .with_value(value)
            .with_cas(cas);
        let response = self.send_request(request)?;
        match response.status() {
            STATUS_OK => Ok(CasStatus::Stored),
            STATUS_KEY_EXISTS | STATUS_ITEM_NOT_STORED => Ok(CasStatus::Exists),
            STATUS_KEY_NOT_FOUND => Ok(CasStatus::NotFound),
            _ => Err(status_error(&response)),
        }
    }

    /// Increments a decimal counter. Returns `None` if the key does not exist.
    pub fn incr(&self, key: &[u8], delta: u64) -> Result<Option<u64>> {
        let mut extras = Vec::with_capacity(20);
        extras.extend_from_slice(&delta.to_be_bytes());
        extras.extend_from_slice(&0u64.to_be_bytes());
        extras.extend_from_slice(&INCR_NO_CREATE.to_be_bytes());
        let mut request = Request::new(OP_INCREMENT, key);
        request.extras = extras;

        let response = self.send_request(request)?;
        match response.status() {
            STATUS_OK => match response.value.as_slice().try_into() {
                Ok(raw) => Ok(Some(u64::from_be_bytes(raw))),
                Err(_) => Err(Error::invalid_response(format!(
                    "incr value has {} bytes",
                    response.value.len()
                ))),
            },
            STATUS_KEY_NOT_FOUND => Ok(None),
            _ => Err(status_error(&response)),
        }
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let response = self.send_request(Request::new(OP_DELETE, key))?;
        match response.status() {
            STATUS_OK => Ok(true),
            STATUS_KEY_NOT_FOUND => Ok(false),
            _ => Err(status_error(&response)),
        }
    }

    pub fn flush_all(&self) -> Result<()> {
        let response = self.send_request(Request::new(OP_FLUSH, &[]))?;
        match response.status() {
            STATUS_OK => Ok(()),
            _ => Err(status_error(&response)),
        }
    }

    pub fn version(&self) -> Result<String> {
        let response = self.send_request(Request::new(OP_VERSION, &[]))?;
        match response.status() {
            STATUS_OK => Ok(String::from_utf8_lossy(&response.value).into_owned()),
            _ => Err(status_error(&response)),
        }
    }

    /// Drops the current stream. The next request dials again.
    pub fn close(&self) {
        if let Ok(mut guard) = self.stream.lock() {
            guard.take();
        }
    }

    pub(crate) fn send_request(&self, mut request: Request<'_>) -> Result<Response> {
        let mut guard = self.stream.lock().map_err(|_| Error::ClientClosed)?;
        if guard.is_none() {
            tracing::debug!(addr = %self.addr, "memcache redialing");
            *guard = Some(connect(&self.addr, &self.config)?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(Error::ClientClosed);
        };

        request.opaque = self.next_opaque.fetch_add(1, Ordering::Relaxed);
        let result = round_trip(stream, &request);
        if let Err(err) = &result {
            if is_connection_error(err) {
                tracing::debug!(addr = %self.addr, error = %err, "memcache stream dropped");
                guard.take();
            }
        }
        result
    }
}

fn round_trip(stream: &mut TcpStream, request: &Request<'_>) -> Result<Response> {
    write_request(stream, request)?;
    let response = read_response(stream)?;
    if response.header.opaque != request.opaque {
        return Err(Error::invalid_response(format!(
            "opaque mismatch: sent {} received {}",
            request.opaque, response.header.opaque
        )));
    }
    if response.header.opcode != request.opcode {
        return Err(Error::invalid_response(format!(
            "opcode mismatch: sent 0x{:02x} received 0x{:02x}",
            request.opcode, response.header.opcode
        )));
    }
    Ok(response)
}

fn status_error(response: &Response) -> Error {
    Error::server(
        response.status(),
        String::from_utf8_lossy(&response.value).into_owned(),
    )
}
