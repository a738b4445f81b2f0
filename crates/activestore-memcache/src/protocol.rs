// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::io::{Read, Write};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

pub const OP_GET: u8 = 0x00;
pub const OP_SET: u8 = 0x01;
pub const OP_ADD: u8 = 0x02;
pub const OP_DELETE: u8 = 0x04;
pub const OP_INCREMENT: u8 = 0x05;
pub const OP_FLUSH: u8 = 0x08;
pub const OP_VERSION: u8 = 0x0b;

pub const STATUS_OK: u16 = 0x0000;
pub const STATUS_KEY_NOT_FOUND: u16 = 0x0001;
pub const STATUS_KEY_EXISTS: u16 = 0x0002;
pub const STATUS_VALUE_TOO_LARGE: u16 = 0x0003;
pub const STATUS_INVALID_ARGUMENTS: u16 = 0x0004;
pub const STATUS_ITEM_NOT_STORED: u16 = 0x0005;
pub const STATUS_NON_NUMERIC: u16 = 0x0006;

/// Expiration sent with `incr` so that a missing key fails instead of being seeded.
pub const INCR_NO_CREATE: u32 = 0xffff_ffff;

pub const HEADER_LEN: usize = 24;
pub const MAX_KEY_LEN: usize = 250;
pub const MAX_BODY_SIZE: u32 = 16 * 1024 * 1024; // 16 MiB

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_PORT: u16 = 11211;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    /// vbucket id on requests, status on responses.
    pub status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub opcode: u8,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Vec<u8>,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> Request<'a> {
    pub fn new(opcode: u8, key: &'a [u8]) -> Self {
        Self {
            opcode,
            opaque: 0,
            cas: 0,
            extras: Vec::new(),
            key,
            value: &[],
        }
    }

    /// Extras layout shared by set/add/cas: flags then expiration.
    pub fn with_storage_extras(mut self, flags: u32, expiration: u32) -> Self {
        let mut extras = Vec::with_capacity(8);
        extras.extend_from_slice(&flags.to_be_bytes());
        extras.extend_from_slice(&expiration.to_be_bytes());
        self.extras = extras;
        self
    }

    pub fn with_value(mut self, value: &'a [u8]) -> Self {
        self.value = value;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: Header,
    pub extras: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.header.status
    }

    pub fn cas(&self) -> u64 {
        self.header.cas
    }
}

pub fn write_request<W: Write>(writer: &mut W, req: &Request<'_>) -> Result<()> {
    if req.key.len() > MAX_KEY_LEN {
        return Err(Error::KeyTooLong(req.key.len()));
    }
    let body_len = req.extras.len() + req.key.len() + req.value.len();
    if body_len > MAX_BODY_SIZE as usize {
        return Err(Error::invalid_request(format!(
            "body size {} exceeds maximum {}",
            body_len, MAX_BODY_SIZE
        )));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + body_len);
    buf.write_u8(MAGIC_REQUEST)?;
    buf.write_u8(req.opcode)?;
    buf.write_u16::<BigEndian>(req.key.len() as u16)?;
    buf.write_u8(req.extras.len() as u8)?;
    buf.write_u8(0)?; // raw bytes
    buf.write_u16::<BigEndian>(0)?; // vbucket
    buf.write_u32::<BigEndian>(body_len as u32)?;
    buf.write_u32::<BigEndian>(req.opaque)?;
    buf.write_u64::<BigEndian>(req.cas)?;
    buf.extend_from_slice(&req.extras);
    buf.extend_from_slice(req.key);
    buf.extend_from_slice(req.value);

    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

pub fn read_header<R: Read>(reader: &mut R) -> Result<Header> {
    let mut raw = [0u8; HEADER_LEN];
    if let Err(err) = reader.read_exact(&mut raw) {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(Error::invalid_response("header truncated"));
        }
        return Err(Error::from(err));
    }
    parse_header(&raw)
}

pub fn parse_header(raw: &[u8; HEADER_LEN]) -> Result<Header> {
    let mut cursor = std::io::Cursor::new(&raw[..]);
    Ok(Header {
        magic: cursor.read_u8()?,
        opcode: cursor.read_u8()?,
        key_len: cursor.read_u16::<BigEndian>()?,
        extras_len: cursor.read_u8()?,
        data_type: cursor.read_u8()?,
        status: cursor.read_u16::<BigEndian>()?,
        body_len: cursor.read_u32::<BigEndian>()?,
        opaque: cursor.read_u32::<BigEndian>()?,
        cas: cursor.read_u64::<BigEndian>()?,
    })
}

pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let header = read_header(reader)?;
    if header.magic != MAGIC_RESPONSE {
        return Err(Error::invalid_response(format!(
            "unexpected magic byte 0x{:02x}",
            header.magic
        )));
    }
    if header.body_len > MAX_BODY_SIZE {
        return Err(Error::invalid_response(format!(
            "body size {} exceeds maximum {}",
            header.body_len, MAX_BODY_SIZE
        )));
    }
    let extras_len = header.extras_len as usize;
    let key_len = header.key_len as usize;
    let body_len = header.body_len as usize;
    if extras_len + key_len > body_len {
        return Err(Error::invalid_response(format!(
            "extras ({extras_len}) and key ({key_len}) exceed body length {body_len}"
        )));
    }

    let mut body = vec![0u8; body_len];
    if let Err(err) = reader.read_exact(&mut body) {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(Error::invalid_response("body truncated"));
        }
        return Err(Error::from(err));
    }

    let value = body.split_off(extras_len + key_len);
    let key = body.split_off(extras_len);
    Ok(Response {
        header,
        extras: body,
        key,
        value,
    })
}
