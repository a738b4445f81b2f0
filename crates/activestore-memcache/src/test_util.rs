// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Loopback memcached stand-in for client tests. Ignores expirations.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use byteorder::{BigEndian, WriteBytesExt};

use crate::protocol::{
    parse_header, HEADER_LEN, MAGIC_RESPONSE, OP_ADD, OP_DELETE, OP_FLUSH, OP_GET, OP_INCREMENT,
    OP_SET, OP_VERSION, STATUS_KEY_EXISTS, STATUS_KEY_NOT_FOUND, STATUS_NON_NUMERIC, STATUS_OK,
    STATUS_VALUE_TOO_LARGE,
};

pub const FAKE_MAX_VALUE: usize = 1024;

#[derive(Default)]
struct FakeState {
    items: HashMap<Vec<u8>, (Vec<u8>, u64)>,
    next_cas: u64,
}

impl FakeState {
    fn bump(&mut self) -> u64 {
        self.next_cas += 1;
        self.next_cas
    }
}

pub struct FakeServer {
    addr: String,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("fake server should bind");
        let addr = listener
            .local_addr()
            .expect("fake server should have an address")
            .to_string();
        let connections = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(Mutex::new(FakeState::default()));

        let accepted = connections.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else {
                    return;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let state = state.clone();
                thread::spawn(move || serve(stream, state));
            }
        });

        Self { addr, connections }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn serve(mut stream: TcpStream, state: Arc<Mutex<FakeState>>) {
    loop {
        let mut raw = [0u8; HEADER_LEN];
        if stream.read_exact(&mut raw).is_err() {
            return;
        }
        let header = parse_header(&raw).expect("header should parse");
        let mut body = vec![0u8; header.body_len as usize];
        if stream.read_exact(&mut body).is_err() {
            return;
        }
        let extras_len = header.extras_len as usize;
        let key_end = extras_len + header.key_len as usize;
        let extras = &body[..extras_len];
        let key = body[extras_len..key_end].to_vec();
        let value = body[key_end..].to_vec();

        let mut state = state.lock().expect("fake state lock");
        let (status, cas, resp_extras, resp_value) = match header.opcode {
            OP_GET => match state.items.get(&key) {
                Some((stored, cas)) => (STATUS_OK, *cas, vec![0, 0, 0, 0], stored.clone()),
                None => (STATUS_KEY_NOT_FOUND, 0, Vec::new(), b"Not found".to_vec()),
            },
            OP_SET if value.len() > FAKE_MAX_VALUE => {
                (STATUS_VALUE_TOO_LARGE, 0, Vec::new(), Vec::new())
            }
            OP_SET => {
                let current = state.items.get(&key).map(|(_, cas)| *cas);
                match (header.cas, current) {
                    (0, _) => {
                        let cas = state.bump();
                        state.items.insert(key, (value, cas));
                        (STATUS_OK, cas, Vec::new(), Vec::new())
                    }
                    (_, None) => (STATUS_KEY_NOT_FOUND, 0, Vec::new(), Vec::new()),
                    (expected, Some(actual)) if expected != actual => {
                        (STATUS_KEY_EXISTS, 0, Vec::new(), Vec::new())
                    }
                    _ => {
                        let cas = state.bump();
                        state.items.insert(key, (value, cas));
                        (STATUS_OK, cas, Vec::new(), Vec::new())
                    }
                }
            }
            OP_ADD => {
                if state.items.contains_key(&key) {
                    (STATUS_KEY_EXISTS, 0, Vec::new(), Vec::new())
                } else {
                    let cas = state.bump();
                    state.items.insert(key, (value, cas));
                    (STATUS_OK, cas, Vec::new(), Vec::new())
                }
            }
            OP_INCREMENT => {
                let delta = u64::from_be_bytes(extras[..8].try_into().expect("delta extras"));
                let current = state.items.get(&key).map(|(stored, _)| stored.clone());
                match current {
                    None => (STATUS_KEY_NOT_FOUND, 0, Vec::new(), Vec::new()),
                    Some(stored) => match String::from_utf8_lossy(&stored).parse::<u64>() {
                        Ok(number) => {
                            let next = number.wrapping_add(delta);
                            let cas = state.bump();
                            state
                                .items
                                .insert(key, (next.to_string().into_bytes(), cas));
                            (STATUS_OK, cas, Vec::new(), next.to_be_bytes().to_vec())
                        }
                        Err(_) => (STATUS_NON_NUMERIC, 0, Vec::new(), Vec::new()),
                    },
                }
            }
            OP_DELETE => match state.items.remove(&key) {
                Some(_) => (STATUS_OK, 0, Vec::new(), Vec::new()),
                None => (STATUS_KEY_NOT_FOUND, 0, Vec::new(), Vec::new()),
            },
            OP_FLUSH => {
                state.items.clear();
                (STATUS_OK, 0, Vec::new(), Vec::new())
            }
            OP_VERSION => (STATUS_OK, 0, Vec::new(), b"fake-1.6".to_vec()),
            _ => (0x0081, 0, Vec::new(), b"Unknown command".to_vec()),
        };
        drop(state);

        let mut out = Vec::with_capacity(HEADER_LEN + resp_extras.len() + resp_value.len());
        out.write_u8(MAGIC_RESPONSE).expect("write");
        out.write_u8(header.opcode).expect("write");
        out.write_u16::<BigEndian>(0).expect("write");
        out.write_u8(resp_extras.len() as u8).expect("write");
        out.write_u8(0).expect("write");
        out.write_u16::<BigEndian>(status).expect("write");
        out.write_u32::<BigEndian>((resp_extras.len() + resp_value.len()) as u32)
            .expect("write");
        out.write_u32::<BigEndian>(header.opaque).expect("write");
        out.write_u64::<BigEndian>(cas).expect("write");
        out.extend_from_slice(&resp_extras);
        out.extend_from_slice(&resp_value);
        if stream.write_all(&out).is_err() {
            return;
        }
    }
}
