//! 통합 테스트: 프레임 → 디스패처 → 테이블 → 리더 전체 경로 검증
//!
//! 엔진을 어태치하고 합성 프레임을 디스패치한 뒤 `TableReader` 스냅샷으로
//! 결과를 확인합니다.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::thread;

use flowtally_common::{PROTO_ICMP, PROTO_TCP, PROTO_UDP};
use flowtally_core::config::TablePolicy;
use flowtally_probe::testing::FrameBuilder;
use flowtally_probe::{
    Decision, EngineConfig, FlowKey, FlowStats, Layer, Outcome, ProbeEngine, SnapshotSource,
};

fn attached(config: EngineConfig) -> ProbeEngine {
    let mut engine = ProbeEngine::builder().config(config).build().unwrap();
    engine.attach().unwrap();
    engine
}

fn snapshot_map(engine: &ProbeEngine) -> HashMap<FlowKey, u64> {
    engine
        .reader()
        .unwrap()
        .snapshot()
        .unwrap()
        .into_iter()
        .collect()
}

fn flow_key(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, proto: u8) -> FlowKey {
    FlowKey::new(
        u32::from_be_bytes(src),
        u32::from_be_bytes(dst),
        sport,
        dport,
        proto,
    )
}

// =============================================================================
// 예제 시나리오
// =============================================================================

#[test]
fn tcp_frames_for_one_flow_accumulate() {
    let engine = attached(EngineConfig::flow_tracker());
    let dispatcher = engine.dispatcher().unwrap();
    let key = flow_key([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80, PROTO_TCP);

    let first = FrameBuilder::tcp([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80)
        .total_len(74)
        .build();
    assert_eq!(dispatcher.dispatch(&first).decision, Decision::Pass);
    assert_eq!(snapshot_map(&engine), HashMap::from([(key, 74)]));

    // 헤더만 54바이트이므로 60바이트 프레임은 6바이트 페이로드
    let second = FrameBuilder::tcp([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80)
        .total_len(60)
        .build();
    assert_eq!(second.len(), 60);
    dispatcher.dispatch(&second);
    assert_eq!(snapshot_map(&engine), HashMap::from([(key, 134)]));
}

#[test]
fn runt_frame_leaves_table_unchanged() {
    let engine = attached(EngineConfig::flow_tracker());
    let verdict = engine.dispatcher().unwrap().dispatch(&[0u8; 10]);

    assert_eq!(verdict.decision, Decision::Pass);
    assert_eq!(verdict.outcome, Outcome::Truncated(Layer::Ethernet));
    assert!(snapshot_map(&engine).is_empty());
}

#[test]
fn arp_frame_leaves_table_unchanged() {
    let engine = attached(EngineConfig::flow_tracker());
    let verdict = engine
        .dispatcher()
        .unwrap()
        .dispatch(&FrameBuilder::arp().total_len(60).build());

    assert_eq!(verdict.decision, Decision::Pass);
    assert_eq!(verdict.outcome, Outcome::Unsupported(Layer::Ethernet));
    assert!(snapshot_map(&engine).is_empty());
}

#[test]
fn icmp_frame_is_counted_with_zero_ports() {
    let engine = attached(EngineConfig::flow_tracker());
    let frame = FrameBuilder::ip([10, 0, 0, 1], [10, 0, 0, 2], PROTO_ICMP)
        .total_len(98)
        .build();
    engine.dispatcher().unwrap().dispatch(&frame);

    let key = flow_key([10, 0, 0, 1], 0, [10, 0, 0, 2], 0, PROTO_ICMP);
    assert_eq!(snapshot_map(&engine), HashMap::from([(key, 98)]));
}

#[test]
fn address_filter_counts_only_target() {
    let target = Ipv4Addr::new(185, 79, 97, 55);
    let engine = attached(EngineConfig::address_filter(target));
    let dispatcher = engine.dispatcher().unwrap();
    let singleton = FlowKey::destination(u32::from(target));

    let hit = FrameBuilder::tcp([10, 0, 0, 1], 40000, [185, 79, 97, 55], 443)
        .total_len(100)
        .build();
    assert_eq!(dispatcher.dispatch(&hit).outcome, Outcome::Counted);
    assert_eq!(snapshot_map(&engine), HashMap::from([(singleton, 100)]));

    let miss = FrameBuilder::tcp([10, 0, 0, 1], 40000, [8, 8, 8, 8], 443)
        .total_len(100)
        .build();
    let verdict = dispatcher.dispatch(&miss);
    assert_eq!(verdict.decision, Decision::Pass);
    assert_eq!(verdict.outcome, Outcome::Filtered);
    assert_eq!(snapshot_map(&engine), HashMap::from([(singleton, 100)]));
}

// =============================================================================
// 속성
// =============================================================================

#[test]
fn truncated_headers_at_every_layer_leave_table_unchanged() {
    let engine = attached(EngineConfig::flow_tracker());
    let dispatcher = engine.dispatcher().unwrap();

    let tcp = FrameBuilder::tcp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2).build();
    let udp = FrameBuilder::udp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2).build();
    for frame in [&tcp, &udp] {
        for len in 0..frame.len() {
            let verdict = dispatcher.dispatch(&frame[..len]);
            assert_eq!(verdict.decision, Decision::Pass);
            assert!(!verdict.outcome.mutated_table(), "len {len}");
        }
    }
    assert!(snapshot_map(&engine).is_empty());
}

#[test]
fn counters_are_order_independent_sums() {
    let engine = attached(EngineConfig::flow_tracker().with_capacity(64));
    let dispatcher = engine.dispatcher().unwrap();

    let mut expected: HashMap<FlowKey, u64> = HashMap::new();
    for i in 0..40u16 {
        let sport = 1000 + i % 4;
        let len = 64 + usize::from(i) * 3;
        let frame = FrameBuilder::udp([192, 168, 0, 1], sport, [192, 168, 0, 2], 53)
            .total_len(len)
            .build();
        dispatcher.dispatch(&frame);
        *expected
            .entry(flow_key([192, 168, 0, 1], sport, [192, 168, 0, 2], 53, PROTO_UDP))
            .or_default() += len as u64;
    }

    assert_eq!(snapshot_map(&engine), expected);
}

#[test]
fn eviction_variant_restarts_evicted_counter() {
    let engine = attached(EngineConfig::flow_tracker());
    let dispatcher = engine.dispatcher().unwrap();
    let frame = |n: u8| FrameBuilder::tcp([10, 0, 1, n], 5000, [10, 0, 0, 2], 80).build();

    for n in 0..16 {
        dispatcher.dispatch(&frame(n));
    }
    dispatcher.dispatch(&frame(0));
    assert_eq!(engine.reader().unwrap().snapshot().unwrap().len(), 16);

    // 가장 오래 접근되지 않은 것은 n = 1
    assert_eq!(dispatcher.dispatch(&frame(16)).outcome, Outcome::Evicted);
    let table = snapshot_map(&engine);
    assert_eq!(table.len(), 16);
    let evicted = flow_key([10, 0, 1, 1], 5000, [10, 0, 0, 2], 80, PROTO_TCP);
    assert!(!table.contains_key(&evicted));

    let len = frame(1).len() as u64;
    dispatcher.dispatch(&frame(1));
    assert_eq!(snapshot_map(&engine).get(&evicted), Some(&len));
}

#[test]
fn fixed_variant_drops_new_keys_when_full() {
    let engine = attached(
        EngineConfig::flow_tracker()
            .with_policy(TablePolicy::Fixed)
            .with_capacity(2),
    );
    let dispatcher = engine.dispatcher().unwrap();
    let frame = |n: u8| FrameBuilder::udp([10, 0, 1, n], 5000, [10, 0, 0, 2], 53).build();

    dispatcher.dispatch(&frame(1));
    dispatcher.dispatch(&frame(2));
    let verdict = dispatcher.dispatch(&frame(3));
    assert_eq!(verdict.decision, Decision::Pass);
    assert_eq!(verdict.outcome, Outcome::TableFull);
    assert_eq!(snapshot_map(&engine).len(), 2);
}

#[test]
fn concurrent_dispatch_loses_no_updates() {
    let engine = attached(EngineConfig::flow_tracker());
    let dispatcher = engine.dispatcher().unwrap();
    let lengths: Vec<usize> = (0..8).map(|t| 60 + t * 10).collect();

    thread::scope(|s| {
        for len in &lengths {
            let frame = FrameBuilder::tcp([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80)
                .total_len(*len)
                .build();
            s.spawn(move || {
                for _ in 0..500 {
                    dispatcher.dispatch(&frame);
                }
            });
        }
    });

    let expected: u64 = lengths.iter().map(|len| *len as u64 * 500).sum();
    let key = flow_key([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80, PROTO_TCP);
    assert_eq!(snapshot_map(&engine), HashMap::from([(key, expected)]));
}

// =============================================================================
// 수집기
// =============================================================================

#[test]
fn collector_reads_without_resetting_table() {
    let engine = attached(EngineConfig::flow_tracker());
    let reader = engine.reader().unwrap();
    let mut stats = FlowStats::new(reader.capacity(), reader.policy());

    let frame = FrameBuilder::tcp([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80)
        .total_len(74)
        .build();
    engine.dispatcher().unwrap().dispatch(&frame);

    let first = stats.update(reader.snapshot().unwrap());
    let second = stats.update(reader.snapshot().unwrap());
    assert_eq!(first.total_bytes, 74);
    assert_eq!(second.total_bytes, 74);
    assert_eq!(second.rows[0].protocol, "TCP");
    assert_eq!(second.rows[0].dst_port, 80);
}
