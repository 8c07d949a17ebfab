// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::unreadable_literal)] // Identifiers in hex

//! Registrar daemon tests with real ASAP instances on loopback.
//!
//! The registrar runs in-process on its own tokio runtime; pool elements and
//! pool users are plain `AsapInstance`s pointed at it as a static registrar.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use rserpool::message::constants::{AEC_UNRECOGNIZED_MESSAGE, PPID_ASAP};
use rserpool::transport::{encode_frame, FrameBuffer};
use rserpool::{
    decode, encode, AsapConfig, AsapInstance, PolicySettings, PoolElementParameter, PoolHandle,
    RserpoolMessage, RspError, TransportAddressBlock,
};
use rserpool_registrar::{Registrar, RegistrarConfig, ServerError};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

struct TestRegistrar {
    runtime: Runtime,
    registrar: Registrar,
    addr: SocketAddr,
    serve: Option<JoinHandle<Result<(), ServerError>>>,
}

impl TestRegistrar {
    fn start(config: RegistrarConfig) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let registrar = Registrar::new(RegistrarConfig {
            announce_enabled: false,
            ..config
        })
        .unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = registrar.clone();
        let serve = runtime.spawn(async move { server.serve(listener).await });
        Self {
            runtime,
            registrar,
            addr,
            serve: Some(serve),
        }
    }

    fn pool_element_count(&self) -> usize {
        self.runtime.block_on(self.registrar.pool_element_count())
    }

    fn stop(&mut self) -> Option<Result<(), ServerError>> {
        self.registrar.shutdown();
        let serve = self.serve.take()?;
        self.runtime.block_on(serve).ok()
    }
}

impl Drop for TestRegistrar {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn pool_handle(name: &str) -> PoolHandle {
    PoolHandle::try_from(name).unwrap()
}

fn pool_element(identifier: u32, port: u16) -> PoolElementParameter {
    PoolElementParameter {
        identifier,
        home_registrar_identifier: 0,
        registration_life: 30_000,
        user_transport: TransportAddressBlock::tcp(SocketAddr::from(([127, 0, 0, 1], port))),
        policy: PolicySettings::round_robin(),
        registrator_transport: None,
    }
}

fn asap_for(registrar: SocketAddr) -> AsapInstance {
    let config = AsapConfig::default()
        .with_auto_config(false)
        .with_response_timeout_us(1_000_000)
        .with_connect_timeout_us(1_000_000)
        .with_static_registrar(registrar.to_string());
    AsapInstance::new(config).unwrap()
}

fn port_of(pe: &rserpool::PoolElementNode) -> Option<u16> {
    pe.user_transport.socket_addrs().first().map(SocketAddr::port)
}

/// Bare ASAP client speaking frames directly.
struct RawClient {
    stream: TcpStream,
    frames: FrameBuffer,
}

impl RawClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            stream,
            frames: FrameBuffer::new(65536),
        }
    }

    fn send_raw(&mut self, payload: &[u8]) {
        self.stream
            .write_all(&encode_frame(PPID_ASAP, payload))
            .unwrap();
    }

    fn send(&mut self, message: &RserpoolMessage) {
        self.send_raw(&encode(message).unwrap());
    }

    fn receive(&mut self) -> RserpoolMessage {
        let mut buf = [0u8; 4096];
        loop {
            if let Some((ppid, payload)) = self.frames.next_frame().unwrap() {
                return decode(&payload, ppid).unwrap();
            }
            let n = self.stream.read(&mut buf).unwrap();
            assert!(n > 0, "registrar closed the connection");
            self.frames.push(&buf[..n]);
        }
    }
}

#[test]
fn test_register_and_resolve_through_registrar() {
    let registrar = TestRegistrar::start(RegistrarConfig::default());
    let pool = pool_handle("EchoPool");

    let pe1 = asap_for(registrar.addr);
    let pe2 = asap_for(registrar.addr);
    assert_eq!(
        pe1.register(&pool, &pool_element(0x11, 9001), true, false)
            .unwrap(),
        0x11
    );
    assert_eq!(
        pe2.register(&pool, &pool_element(0x12, 9002), true, false)
            .unwrap(),
        0x12
    );
    assert_eq!(registrar.pool_element_count(), 2);
    assert_eq!(pe1.registrar().map(|r| r.address), Some(registrar.addr));

    let user = asap_for(registrar.addr);
    let mut ports = user
        .handle_resolution(&pool, 2, 5_000_000, port_of)
        .unwrap();
    ports.sort_unstable();
    assert_eq!(ports, vec![9001, 9002]);
}

#[test]
fn test_unknown_pool_is_not_found() {
    let registrar = TestRegistrar::start(RegistrarConfig::default());
    let user = asap_for(registrar.addr);

    assert!(matches!(
        user.handle_resolution(&pool_handle("Nowhere"), 1, 5_000_000, port_of),
        Err(RspError::NotFound)
    ));
}

#[test]
fn test_deregistration_removes_element() {
    let registrar = TestRegistrar::start(RegistrarConfig::default());
    let pool = pool_handle("EchoPool");
    let pe = asap_for(registrar.addr);

    pe.register(&pool, &pool_element(0x21, 9001), true, false)
        .unwrap();
    assert_eq!(registrar.pool_element_count(), 1);

    pe.deregister(&pool, 0x21, true).unwrap();
    assert_eq!(registrar.pool_element_count(), 0);
    assert!(pe.own_pool_elements().is_empty());
}

#[test]
fn test_closed_connection_removes_elements() {
    let registrar = TestRegistrar::start(RegistrarConfig::default());
    let pool = pool_handle("EchoPool");

    let mut pe = asap_for(registrar.addr);
    pe.register(&pool, &pool_element(0x31, 9001), true, false)
        .unwrap();
    pe.register(&pool, &pool_element(0x32, 9002), true, false)
        .unwrap();
    assert_eq!(registrar.pool_element_count(), 2);

    pe.shutdown();
    assert!(wait_until(|| registrar.pool_element_count() == 0));
}

#[test]
fn test_acknowledged_keep_alives_keep_element() {
    let registrar = TestRegistrar::start(RegistrarConfig {
        keep_alive_transmission_interval_ms: 100,
        keep_alive_timeout_ms: 200,
        ..Default::default()
    });
    let pool = pool_handle("EchoPool");
    let pe = asap_for(registrar.addr);
    pe.register(&pool, &pool_element(0x41, 9001), true, false)
        .unwrap();

    thread::sleep(Duration::from_millis(800));
    assert_eq!(registrar.pool_element_count(), 1);
    // Keep-alives carry the registrar identifier, which the element adopts.
    assert_eq!(
        pe.registrar().map(|r| r.identifier),
        Some(registrar.registrar.identifier())
    );
    assert_eq!(
        pe.own_pool_elements()[0].1.home_registrar_identifier,
        registrar.registrar.identifier()
    );
}

#[test]
fn test_silent_element_is_removed() {
    let registrar = TestRegistrar::start(RegistrarConfig {
        keep_alive_transmission_interval_ms: 100,
        keep_alive_timeout_ms: 100,
        ..Default::default()
    });
    let pool = pool_handle("EchoPool");
    let mut client = RawClient::connect(registrar.addr);

    client.send(&RserpoolMessage::Registration {
        pool_handle: pool.clone(),
        pool_element: pool_element(0x51, 9001),
    });
    assert!(matches!(
        client.receive(),
        RserpoolMessage::RegistrationResponse { identifier: 0x51, error: None, .. }
    ));
    assert_eq!(registrar.pool_element_count(), 1);

    match client.receive() {
        RserpoolMessage::EndpointKeepAlive {
            registrar_identifier,
            home,
            identifier,
            ..
        } => {
            assert_eq!(registrar_identifier, registrar.registrar.identifier());
            assert!(home);
            assert_eq!(identifier, Some(0x51));
        }
        other => panic!("expected keep-alive, got {}", other),
    }

    // No ack: the element goes once the keep-alive times out, while the
    // connection itself stays open.
    assert!(wait_until(|| registrar.pool_element_count() == 0));
}

#[test]
fn test_reported_failures_remove_element() {
    let registrar = TestRegistrar::start(RegistrarConfig {
        max_bad_pe_reports: 3,
        ..Default::default()
    });
    let pool = pool_handle("EchoPool");
    let pe = asap_for(registrar.addr);
    pe.register(&pool, &pool_element(0x61, 9001), true, false)
        .unwrap();

    let user = asap_for(registrar.addr);
    for _ in 0..2 {
        user.report_failure(&pool, 0x61).unwrap();
    }
    // A resolution is answered in order behind the reports.
    assert_eq!(
        user.handle_resolution(&pool, 1, 5_000_000, port_of).unwrap(),
        vec![9001]
    );
    assert_eq!(registrar.pool_element_count(), 1);

    user.report_failure(&pool, 0x61).unwrap();
    assert!(wait_until(|| registrar.pool_element_count() == 0));
}

#[test]
fn test_reregistration_with_other_policy_is_rejected() {
    let registrar = TestRegistrar::start(RegistrarConfig::default());
    let pool = pool_handle("EchoPool");
    let mut client = RawClient::connect(registrar.addr);

    client.send(&RserpoolMessage::Registration {
        pool_handle: pool.clone(),
        pool_element: pool_element(0x71, 9001),
    });
    assert!(matches!(
        client.receive(),
        RserpoolMessage::RegistrationResponse { error: None, .. }
    ));

    let mut changed = pool_element(0x71, 9001);
    changed.policy = PolicySettings::least_used(0);
    client.send(&RserpoolMessage::Registration {
        pool_handle: pool,
        pool_element: changed,
    });
    assert!(matches!(
        client.receive(),
        RserpoolMessage::RegistrationResponse { error: Some(_), .. }
    ));
    assert_eq!(registrar.pool_element_count(), 1);
}

#[test]
fn test_malformed_message_gets_error() {
    let registrar = TestRegistrar::start(RegistrarConfig::default());
    let mut client = RawClient::connect(registrar.addr);

    client.send_raw(&[0x7f, 0, 0, 4]);
    match client.receive() {
        RserpoolMessage::Error { error } => assert_eq!(error.cause, AEC_UNRECOGNIZED_MESSAGE),
        other => panic!("expected error, got {}", other),
    }

    // The connection survives.
    client.send(&RserpoolMessage::HandleResolution {
        pool_handle: pool_handle("Nowhere"),
        items: None,
    });
    assert!(matches!(
        client.receive(),
        RserpoolMessage::HandleResolutionResponse { error: Some(_), .. }
    ));
}

#[test]
fn test_shutdown_stops_serving() {
    let mut registrar = TestRegistrar::start(RegistrarConfig::default());
    assert!(wait_until(|| registrar.registrar.is_running()));

    assert!(matches!(registrar.stop(), Some(Ok(()))));
    assert!(!registrar.registrar.is_running());
}
