// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scripted loopback registrar shared by the engine integration tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rserpool::message::constants::PPID_ASAP;
use rserpool::transport::{encode_frame, FrameBuffer};
use rserpool::{
    decode, encode, AsapConfig, OperationError, PolicySettings, PoolElementParameter, PoolHandle,
    RserpoolMessage, TransportAddressBlock,
};

/// What the registrar does with one received request.
pub enum Reply {
    Send(Vec<RserpoolMessage>),
    /// Say nothing.
    Silence,
    /// Drop the connection.
    Hangup,
}

pub type Script = Box<dyn FnMut(&RserpoolMessage) -> Reply + Send>;

/// A TCP registrar whose replies come from a script.
pub struct ScriptedRegistrar {
    pub addr: SocketAddr,
    received_rx: Receiver<RserpoolMessage>,
    connections: Arc<Mutex<Vec<TcpStream>>>,
    accepted: Arc<Mutex<usize>>,
    stop: Arc<AtomicBool>,
}

impl ScriptedRegistrar {
    pub fn spawn(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received_rx) = unbounded();
        let connections = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(Mutex::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let script = Arc::new(Mutex::new(script));

        {
            let connections = Arc::clone(&connections);
            let accepted = Arc::clone(&accepted);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_nonblocking(false).unwrap();
                            *accepted.lock() += 1;
                            connections.lock().push(stream.try_clone().unwrap());
                            let script = Arc::clone(&script);
                            let received_tx = received_tx.clone();
                            thread::spawn(move || serve(stream, script, received_tx));
                        }
                        Err(_) => thread::sleep(Duration::from_millis(10)),
                    }
                }
            });
        }

        Self {
            addr,
            received_rx,
            connections,
            accepted,
            stop,
        }
    }

    /// Next request the registrar received.
    pub fn next_request(&self) -> RserpoolMessage {
        self.received_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("registrar received nothing")
    }

    pub fn try_next_request(&self, timeout: Duration) -> Option<RserpoolMessage> {
        self.received_rx.recv_timeout(timeout).ok()
    }

    pub fn accepted(&self) -> usize {
        *self.accepted.lock()
    }

    /// Push an unsolicited message on the most recent connection.
    pub fn push(&self, message: &RserpoolMessage) {
        let mut connections = self.connections.lock();
        let stream = connections.last_mut().expect("no connection");
        stream
            .write_all(&encode_frame(PPID_ASAP, &encode(message).unwrap()))
            .unwrap();
    }
}

impl Drop for ScriptedRegistrar {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for stream in self.connections.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn serve(
    mut stream: TcpStream,
    script: Arc<Mutex<Script>>,
    received_tx: Sender<RserpoolMessage>,
) {
    let mut frames = FrameBuffer::new(65536);
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        frames.push(&buf[..n]);
        while let Ok(Some((ppid, payload))) = frames.next_frame() {
            let Ok(request) = decode(&payload, ppid) else {
                return;
            };
            let reply = (script.lock())(&request);
            let _ = received_tx.send(request);
            match reply {
                Reply::Send(messages) => {
                    for message in messages {
                        let frame = encode_frame(PPID_ASAP, &encode(&message).unwrap());
                        if stream.write_all(&frame).is_err() {
                            return;
                        }
                    }
                }
                Reply::Silence => {}
                Reply::Hangup => {
                    let _ = stream.shutdown(Shutdown::Both);
                    return;
                }
            }
        }
    }
}

/// Answer like a well-behaved registrar: accept every registration and
/// deregistration, resolve from `pool`.
pub fn accepting_script(pool: Vec<PoolElementParameter>) -> Script {
    Box::new(move |request| match accept(request, &pool) {
        Some(response) => Reply::Send(vec![response]),
        None => Reply::Silence,
    })
}

/// Positive answer to a request; `None` for messages that take no response.
pub fn accept(
    request: &RserpoolMessage,
    pool: &[PoolElementParameter],
) -> Option<RserpoolMessage> {
    let response = match request {
        RserpoolMessage::Registration {
            pool_handle,
            pool_element,
        } => RserpoolMessage::RegistrationResponse {
            pool_handle: pool_handle.clone(),
            identifier: pool_element.identifier,
            error: None,
        },
        RserpoolMessage::Deregistration {
            pool_handle,
            identifier,
        } => RserpoolMessage::DeregistrationResponse {
            pool_handle: pool_handle.clone(),
            identifier: *identifier,
            error: None,
        },
        RserpoolMessage::HandleResolution { pool_handle, .. } => {
            RserpoolMessage::HandleResolutionResponse {
                pool_handle: pool_handle.clone(),
                policy: pool.first().map(|pe| pe.policy),
                elements: pool.to_vec(),
                error: if pool.is_empty() {
                    Some(OperationError::new(
                        rserpool::message::constants::AEC_UNKNOWN_POOL_HANDLE,
                    ))
                } else {
                    None
                },
            }
        }
        _ => return None,
    };
    Some(response)
}

pub fn pool_handle(name: &str) -> PoolHandle {
    PoolHandle::try_from(name).unwrap()
}

pub fn pool_element(identifier: u32, port: u16) -> PoolElementParameter {
    PoolElementParameter {
        identifier,
        home_registrar_identifier: 0,
        registration_life: 30_000,
        user_transport: TransportAddressBlock::tcp(SocketAddr::from(([127, 0, 0, 1], port))),
        policy: PolicySettings::round_robin(),
        registrator_transport: None,
    }
}

/// Config pointing at `registrars` only, with short timeouts.
pub fn config_for(registrars: &[SocketAddr]) -> AsapConfig {
    let mut config = AsapConfig::default()
        .with_auto_config(false)
        .with_response_timeout_us(500_000)
        .with_connect_timeout_us(500_000)
        .with_connect_max_trials(2)
        .with_request_max_trials(2);
    for registrar in registrars {
        config = config.with_static_registrar(registrar.to_string());
    }
    config
}
