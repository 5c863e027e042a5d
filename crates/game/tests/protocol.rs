use std::time::{Duration, Instant};

use riptide::net::protocol::{CRC_SIZE, HEADER_SIZE, SAFE_PAYLOAD};
use riptide::{
    ChunkAssembler, Health, IpEndpoint, Lives, Message, PacketDirection, Registry,
    ReplicationEngine, RenderType, Score, SnapshotPacket, Transform, UdpTransport, UpdateMask,
    Velocity,
};

fn recv_datagram(transport: &UdpTransport, timeout_ms: u64) -> Option<(Vec<u8>, IpEndpoint)> {
    let mut buf = [0u8; 2048];
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        match transport.recv_from(&mut buf) {
            Ok((size, from)) => return Some((buf[..size].to_vec(), from)),
            Err(e) if e.is_transient() => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("recv failed: {e}"),
        }
    }
    None
}

#[test]
fn hello_roundtrip_over_loopback() {
    let server = UdpTransport::open(IpEndpoint::localhost(0)).unwrap();
    let client = UdpTransport::open(IpEndpoint::localhost(0)).unwrap();

    let hello = Message::ClientHello.encode(0, 0);
    client.send_to(&hello, server.local_endpoint()).unwrap();

    let (datagram, from) = recv_datagram(&server, 500).expect("no datagram at server");
    assert_eq!(from, client.local_endpoint());
    let (header, message) =
        Message::decode(&datagram, PacketDirection::ClientToServer).unwrap();
    assert_eq!(message, Message::ClientHello);
    assert_eq!(header.sequence_id, 0);

    let reply = Message::ServerHello.encode(header.sequence_id, 0);
    server.send_to(&reply, from).unwrap();

    let (datagram, _) = recv_datagram(&client, 500).expect("no reply at client");
    let (_, message) = Message::decode(&datagram, PacketDirection::ServerToClient).unwrap();
    assert_eq!(message, Message::ServerHello);
}

#[test]
fn replication_to_client_pipeline_with_chunking() {
    // 200 fully-populated entities force the encoder past one datagram.
    let mut registry = Registry::new();
    for i in 0..200u32 {
        let id = registry.create_entity();
        registry.emplace(id, Transform::at(100.0 + i as f32, 400.0));
        registry.emplace(id, Velocity(glam::Vec2::new(1.0, -1.0)));
        registry.emplace(id, Health::full(5));
        registry.emplace(id, RenderType(8));
        registry.emplace(id, Lives { current: 3, max: 3 });
        registry.emplace(id, Score(0));
    }

    let mut engine = ReplicationEngine::default();
    let result = engine.synchronize(&registry, 5);
    assert_eq!(result.spawns.len(), 200);
    assert!(result.packets.len() > 1, "expected chunked output");

    let chunk_count = result.packets.len() as u8;
    for packet in &result.packets {
        assert_eq!(packet.tick_id, 5);
        assert_eq!(packet.chunk_count, chunk_count);
    }

    // Ship every chunk through the real codec and reassemble client-side.
    let mut assembler = ChunkAssembler::new();
    let mut applied = None;
    for packet in &result.packets {
        let datagram = packet.to_datagram(17);
        assert!(datagram.len() <= HEADER_SIZE + SAFE_PAYLOAD + CRC_SIZE);

        let (header, message) =
            Message::decode(&datagram, PacketDirection::ServerToClient).unwrap();
        assert_eq!(header.sequence_id, 17);
        let mut decoded = match message {
            Message::SnapshotChunk(p) | Message::Snapshot(p) => p,
            other => panic!("unexpected message {other:?}"),
        };
        decoded.tick_id = header.tick_id;
        if let Some(complete) = assembler.push(decoded) {
            applied = Some(complete);
        }
    }

    let (tick, entities) = applied.expect("chunk set never completed");
    assert_eq!(tick, 5);
    assert_eq!(entities.len(), 200);
    assert!(entities.iter().all(|e| e.mask.contains(UpdateMask::POS_X)));
}

#[test]
fn delta_after_full_carries_one_entity() {
    let mut registry = Registry::new();
    let id = registry.create_entity();
    registry.emplace(id, Transform::at(100.0, 400.0));
    registry.emplace(id, Health::full(1));
    registry.emplace(id, RenderType(1));

    let mut engine = ReplicationEngine::default();
    let full = engine.synchronize(&registry, 1);
    assert_eq!(full.packets.len(), 1);

    registry.get_mut::<Transform>(id).unwrap().pos.x = 101.0;
    let delta = engine.synchronize(&registry, 2);
    assert_eq!(delta.packets.len(), 1);

    // Through the wire and back: exactly one entity, exactly one bit.
    let datagram = delta.packets[0].to_datagram(0);
    let (_, message) = Message::decode(&datagram, PacketDirection::ServerToClient).unwrap();
    let packet: SnapshotPacket = match message {
        Message::Snapshot(p) => p,
        other => panic!("unexpected message {other:?}"),
    };
    assert_eq!(packet.entities.len(), 1);
    assert_eq!(packet.entities[0].mask, UpdateMask::POS_X);
    assert_eq!(packet.entities[0].pos_x, 101.0);
}
