//! Broadcast scheduler behavior: what goes out, in what order.

use std::time::{Duration, Instant};

use bytes::Bytes;
use packmule_proto::{
    engine::{Engine, EngineConfig},
    id::{BundleId, RecipientPrefix, Sid, SidPrefix},
    store::Bundle,
    testing::MemoryStore,
    wire::{self, FrameHeader, MessageSeq, Record},
};
use rand::{rngs::SmallRng, SeedableRng};

const MY_SID: Sid = Sid([0x42; 32]);
const PEER: SidPrefix = SidPrefix([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

fn engine_with_sid(sid: Sid, seed: u64) -> Engine {
    Engine::with_rng(EngineConfig::default(), sid, SmallRng::seed_from_u64(seed))
}

fn engine() -> Engine {
    engine_with_sid(MY_SID, 99)
}

fn bundle(id_byte: u8, version: u64, manifest_len: usize, body_len: usize) -> Bundle {
    Bundle {
        id: BundleId([id_byte; 32]),
        version,
        recipient: RecipientPrefix::default(),
        is_journal: false,
        manifest: Bytes::from(vec![0x4D; manifest_len]),
        body: Bytes::from(vec![0x42; body_len]),
    }
}

fn hold(engine: &mut Engine, store: &mut MemoryStore, bundle: Bundle) {
    store.listing = vec![bundle];
    engine
        .refresh_inventory(store, Duration::from_millis(500))
        .unwrap();
    store.listing.clear();
}

fn hear_empty_frame(engine: &mut Engine, store: &mut MemoryStore, sender: SidPrefix, now: Instant) {
    let mut raw = Vec::new();
    FrameHeader {
        sender,
        seq: MessageSeq::new(1),
        retransmission: false,
    }
    .encode(&mut raw);
    engine.handle_frame(now, store, &raw).unwrap();
}

fn decode(frame: &[u8]) -> (FrameHeader, Vec<Record>) {
    let mut buf = Bytes::copy_from_slice(frame);
    let header = wire::read_header(&mut buf).unwrap();
    let mut records = Vec::new();
    while !buf.is_empty() {
        records.push(wire::read_record(&mut buf).unwrap());
    }
    (header, records)
}

#[test]
fn nothing_to_say_with_empty_inventory() {
    let mut engine = engine();
    assert_eq!(None, engine.next_frame(Instant::now()));
}

#[test]
fn rotating_bars_cycle_through_inventory() {
    let mut engine = engine();
    let mut store = MemoryStore::default();
    let mut now = Instant::now();

    store.listing = vec![bundle(1, 1, 8, 8), bundle(2, 1, 8, 8)];
    engine
        .refresh_inventory(&mut store, Duration::from_millis(500))
        .unwrap();

    let mut announced = Vec::new();
    for _ in 0..2 {
        now += Duration::from_secs(3);
        let frame = engine.next_frame(now).unwrap();
        let (_, records) = decode(&frame);
        assert_eq!(1, records.len());
        match &records[0] {
            Record::Bar(bar) => announced.push(bar.bid),
            Record::Piece(_) => panic!("expected a BAR with no peers to send to"),
        }
    }
    announced.sort();
    announced.dedup();
    assert_eq!(2, announced.len(), "both bundles take a turn");
}

#[test]
fn identical_bar_within_window_is_a_retransmission() {
    let mut engine = engine();
    let mut store = MemoryStore::default();
    let now = Instant::now();

    hold(&mut engine, &mut store, bundle(1, 1, 8, 8));

    let (h1, _) = decode(&engine.next_frame(now).unwrap());
    assert!(!h1.retransmission);
    let (h2, _) = decode(&engine.next_frame(now + Duration::from_millis(875)).unwrap());
    assert!(h2.retransmission);
    assert_eq!(h1.seq, h2.seq);

    // outside the window the same record is a fresh frame again
    let (h3, _) = decode(&engine.next_frame(now + Duration::from_secs(10)).unwrap());
    assert!(!h3.retransmission);
    assert_eq!(h1.seq.next(), h3.seq);
}

#[test]
fn forced_announcement_precedes_transfer() {
    let mut engine = engine();
    let mut store = MemoryStore::default();
    let now = Instant::now();

    hold(&mut engine, &mut store, bundle(1, 1, 8, 8));
    hear_empty_frame(&mut engine, &mut store, PEER, now);

    // a peer offers an old version of bundle 1, raising announce_now
    let mut raw = Vec::new();
    FrameHeader {
        sender: PEER,
        seq: MessageSeq::new(2),
        retransmission: false,
    }
    .encode(&mut raw);
    Record::Bar(wire::Bar {
        bid: BundleId([1; 32]).prefix(),
        version: 0,
        recipient: RecipientPrefix::default(),
    })
    .encode(&mut raw);
    engine.handle_frame(now, &mut store, &raw).unwrap();
    assert!(engine.inventory()[0].announce_now);

    let (_, records) = decode(&engine.next_frame(now).unwrap());
    assert!(matches!(records[0], Record::Bar(_)));
    assert!(!engine.inventory()[0].announce_now, "flag cleared on emission");
}

#[test]
fn manifest_pieces_precede_body_pieces() {
    let mut engine = engine();
    let mut store = MemoryStore::default();
    let mut now = Instant::now();

    // manifest of 300 bytes needs two pieces at the 200-byte MTU
    hold(&mut engine, &mut store, bundle(1, 1, 300, 100));
    hear_empty_frame(&mut engine, &mut store, PEER, now);

    let mut kinds = Vec::new();
    loop {
        now += Duration::from_secs(1);
        let frame = engine.next_frame(now).unwrap();
        let (_, records) = decode(&frame);
        match &records[0] {
            Record::Piece(piece) => {
                kinds.push((piece.is_manifest, piece.offset, piece.is_end));
                if !piece.is_manifest && piece.is_end {
                    break;
                }
            }
            Record::Bar(_) => panic!("expected pieces while a transfer is active"),
        }
    }

    assert_eq!(
        vec![
            (true, 0, false),
            (true, 171, true),
            (false, 0, true),
        ],
        kinds
    );
    assert!(!engine.transfer_in_progress(), "transfer done after body end");
}

#[test]
fn peers_bar_stops_transfer_of_that_bundle() {
    let mut engine = engine();
    let mut store = MemoryStore::default();
    let mut now = Instant::now();

    hold(&mut engine, &mut store, bundle(1, 3, 300, 100));
    hear_empty_frame(&mut engine, &mut store, PEER, now);

    now += Duration::from_secs(1);
    let frame = engine.next_frame(now).unwrap();
    let (_, records) = decode(&frame);
    assert!(matches!(records[0], Record::Piece(_)));
    assert!(engine.transfer_in_progress());

    // the peer turns out to have it (e.g. got it from someone else)
    let mut raw = Vec::new();
    FrameHeader {
        sender: PEER,
        seq: MessageSeq::new(2),
        retransmission: false,
    }
    .encode(&mut raw);
    Record::Bar(wire::Bar {
        bid: BundleId([1; 32]).prefix(),
        version: 3,
        recipient: RecipientPrefix::default(),
    })
    .encode(&mut raw);
    engine.handle_frame(now, &mut store, &raw).unwrap();

    assert!(!engine.transfer_in_progress());
}

#[test]
fn small_bundles_are_preferred() {
    let mut engine = engine();
    let mut store = MemoryStore::default();
    let now = Instant::now();

    store.listing = vec![bundle(1, 1, 100, 4000), bundle(2, 1, 32, 64)];
    engine
        .refresh_inventory(&mut store, Duration::from_millis(500))
        .unwrap();
    hear_empty_frame(&mut engine, &mut store, PEER, now);

    let frame = engine.next_frame(now + Duration::from_secs(1)).unwrap();
    let (_, records) = decode(&frame);
    match &records[0] {
        Record::Piece(piece) => assert_eq!(BundleId([2; 32]).prefix(), piece.bid),
        Record::Bar(_) => panic!("expected a piece"),
    }
}

#[test]
fn direct_addressed_bundles_come_first() {
    let mut engine = engine();
    let mut store = MemoryStore::default();
    let now = Instant::now();

    let mut addressed = bundle(1, 1, 100, 4000);
    addressed.recipient = RecipientPrefix([0xAA, 0xBB, 0xCC, 0xDD]);
    store.listing = vec![bundle(2, 1, 32, 64), addressed];
    engine
        .refresh_inventory(&mut store, Duration::from_millis(500))
        .unwrap();
    hear_empty_frame(&mut engine, &mut store, PEER, now);

    // the big-but-addressed bundle wins over the small broadcast one
    let frame = engine.next_frame(now + Duration::from_secs(1)).unwrap();
    let (_, records) = decode(&frame);
    match &records[0] {
        Record::Piece(piece) => assert_eq!(BundleId([1; 32]).prefix(), piece.bid),
        Record::Bar(_) => panic!("expected a piece"),
    }
}

/// Two engines over a perfect link: B announces something so A learns B
/// exists, then A trickles its bundle across one frame at a time until B
/// commits it.
#[test]
fn two_engines_converge() {
    let mut a = engine_with_sid(Sid([0x01; 32]), 7);
    let mut b = engine_with_sid(Sid([0x02; 32]), 8);
    let mut store_a = MemoryStore::default();
    let mut store_b = MemoryStore::default();
    let mut now = Instant::now();

    hold(&mut a, &mut store_a, bundle(1, 1, 120, 500));
    hold(&mut b, &mut store_b, bundle(9, 1, 16, 16));

    for _ in 0..64 {
        now += Duration::from_secs(1);
        if let Some(frame) = a.next_frame(now) {
            b.handle_frame(now, &mut store_b, &frame).unwrap();
        }
        if let Some(frame) = b.next_frame(now) {
            a.handle_frame(now, &mut store_a, &frame).unwrap();
        }
        if !store_b.commits.is_empty() {
            break;
        }
    }

    assert_eq!(1, store_b.commits.len());
    let (manifest, body) = &store_b.commits[0];
    assert_eq!(vec![0x4D; 120], *manifest);
    assert_eq!(vec![0x42; 500], *body);
}
