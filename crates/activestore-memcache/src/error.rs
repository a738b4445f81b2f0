// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::protocol::{
    STATUS_INVALID_ARGUMENTS, STATUS_KEY_EXISTS, STATUS_KEY_NOT_FOUND, STATUS_ITEM_NOT_STORED,
    STATUS_NON_NUMERIC, STATUS_VALUE_TOO_LARGE,
};

/// memcached client error type.
#[derive(Debug)]
pub enum Error {
    ClientClosed,
    KeyTooLong(usize),
    InvalidRequest(String),
    InvalidResponse(String),
    Server(ServerError),
    Io(std::io::Error),
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub status: u16,
    pub detail: String,
}

impl ServerError {
    pub fn status_name(&self) -> &'static str {
        match self.status {
            STATUS_KEY_NOT_FOUND => "key not found",
            STATUS_KEY_EXISTS => "key exists",
            STATUS_VALUE_TOO_LARGE => "value too large",
            STATUS_INVALID_ARGUMENTS => "invalid arguments",
            STATUS_ITEM_NOT_STORED => "item not stored",
            STATUS_NON_NUMERIC => "incr/decr on non-numeric value",
            _ => "unknown status",
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(
                f,
                "memcached status 0x{:04x}: {}",
                self.status,
                self.status_name()
            )
        } else {
            write!(
                f,
                "memcached status 0x{:04x}: {} ({})",
                self.status,
                self.status_name(),
                self.detail
            )
        }
    }
}

impl std::error::Error for ServerError {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClientClosed => write!(f, "memcache: client closed"),
            Error::KeyTooLong(len) => write!(f, "memcache: key too long ({len} bytes)"),
            Error::InvalidRequest(msg) => write!(f, "memcache: invalid request: {msg}"),
            Error::InvalidResponse(msg) => write!(f, "memcache: invalid response: {msg}"),
            Error::Server(err) => write!(f, "{err}"),
            Error::Io(err) => write!(f, "memcache io: {err}"),
            Error::Timeout => write!(f, "memcache: deadline exceeded"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Server(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Checks whether an error is a server error with the specified status.
pub fn is_server_error(err: &Error, status: u16) -> bool {
    matches!(err, Error::Server(ServerError { status: s, .. }) if *s == status)
}

/// Errors after which the underlying stream can no longer be trusted.
pub fn is_connection_error(err: &Error) -> bool {
    matches!(
        err,
        Error::Io(_) | Error::Timeout | Error::ClientClosed | Error::InvalidResponse(_)
    )
}

impl Error {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Error::InvalidResponse(msg.into())
    }

    pub fn server(status: u16, detail: impl Into<String>) -> Self {
        Error::Server(ServerError {
            status,
            detail: detail.into(),
        })
    }
}
