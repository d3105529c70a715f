//! Benchmarks for the ingress hot path.
//!
//! These benchmarks measure performance of:
//! - Public header parsing
//! - Routing a packet to a live session
//! - Dropping unroutable datagrams
//!
//! Run with: cargo bench -p quicd-dispatcher --bench dispatch_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use quicd_dispatcher::dispatcher::{
    Dispatcher, DispatcherConfig, PacketWriter, ReceivedPacket, Session, SessionContext,
    SessionFactory, SessionParams, TimerQueue, WriteResult,
};
use quicd_wire::{parse_public_header, ConnectionId, ErrorCode, PublicFlags, Version};
use std::net::SocketAddr;
use std::time::Instant;

struct NullWriter;

impl PacketWriter for NullWriter {
    fn write_packet(&mut self, buf: &[u8], _peer: SocketAddr) -> WriteResult {
        WriteResult::Written(buf.len())
    }
}

/// Counts packets and never writes.
struct SinkSession {
    params: SessionParams,
    packets: u64,
}

impl Session for SinkSession {
    fn connection_id(&self) -> ConnectionId {
        self.params.connection_id
    }

    fn version(&self) -> Version {
        self.params.version
    }

    fn process_packet(&mut self, _ctx: &mut SessionContext<'_>, _packet: &ReceivedPacket<'_>) {
        self.packets += 1;
    }

    fn on_can_write(&mut self, _ctx: &mut SessionContext<'_>) -> bool {
        false
    }

    fn close_connection(&mut self, ctx: &mut SessionContext<'_>, error: ErrorCode) {
        ctx.on_connection_closed(error);
    }
}

struct SinkFactory;

impl SessionFactory for SinkFactory {
    fn create_session(&mut self, params: &SessionParams) -> Option<Box<dyn Session>> {
        Some(Box::new(SinkSession {
            params: *params,
            packets: 0,
        }))
    }
}

fn datagram(guid: u64, version: Option<Version>, payload_len: usize) -> Vec<u8> {
    let mut flags = PublicFlags::CONNECTION_ID_8BYTE;
    if version.is_some() {
        flags |= PublicFlags::VERSION;
    }
    let mut buf = vec![flags];
    buf.extend_from_slice(&guid.to_le_bytes());
    if let Some(version) = version {
        buf.extend_from_slice(&version.tag());
    }
    buf.resize(buf.len() + payload_len, 0xAB);
    buf
}

fn bench_header_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("public_header");
    group.throughput(Throughput::Elements(1));

    let with_version = datagram(1, Some(Version::Q013), 1200);
    let without_version = datagram(1, None, 1200);

    group.bench_function("parse_with_version", |b| {
        b.iter(|| parse_public_header(black_box(&with_version)))
    });
    group.bench_function("parse_without_version", |b| {
        b.iter(|| parse_public_header(black_box(&without_version)))
    });

    group.finish();
}

fn bench_process_packet(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_packet");
    group.throughput(Throughput::Elements(1));

    let server: SocketAddr = "127.0.0.1:443".parse().unwrap();
    let client: SocketAddr = "127.0.0.1:50000".parse().unwrap();
    let mut timers = TimerQueue::new();
    let mut dispatcher = Dispatcher::new(
        &DispatcherConfig::default(),
        Box::new(SinkFactory),
        Box::new(NullWriter),
        &mut timers,
    )
    .unwrap();

    // 1024 live sessions
    let now = Instant::now();
    for guid in 0..1024u64 {
        dispatcher.process_packet(server, client, &datagram(guid, Some(Version::Q013), 64), now);
    }
    let packets: Vec<Vec<u8>> = (0..1024u64).map(|guid| datagram(guid, None, 1200)).collect();

    group.bench_function("live_session", |b| {
        let mut idx = 0;
        b.iter(|| {
            let packet = &packets[idx];
            idx = (idx + 1) % packets.len();
            dispatcher.process_packet(server, client, black_box(packet), now);
        })
    });

    let garbage = vec![0xFFu8; 32];
    group.bench_function("malformed_header", |b| {
        b.iter(|| dispatcher.process_packet(server, client, black_box(&garbage), now))
    });

    group.finish();
}

criterion_group!(benches, bench_header_parsing, bench_process_packet);
criterion_main!(benches);
