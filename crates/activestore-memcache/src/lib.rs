// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Synchronous memcached client for the binary protocol.
//!
//! Covers the subset a record store needs: get (with cas token), set, add,
//! cas, incr, delete, flush and version. Keys are raw bytes, so spaces,
//! newlines and non-ASCII text are allowed as long as the key fits in 250 bytes.

pub mod client;
pub mod error;
pub mod protocol;

#[cfg(test)]
mod test_util;

pub use crate::client::{
    dial, with_dial_timeout, with_socket_timeout, CasStatus, Client, ClientOption, Item,
};
pub use crate::error::{is_connection_error, is_server_error, Error, Result, ServerError};
pub use crate::protocol::{
    DEFAULT_DIAL_TIMEOUT, DEFAULT_PORT, DEFAULT_SOCKET_TIMEOUT, MAX_KEY_LEN,
};
