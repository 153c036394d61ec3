#![no_main]

use std::net::Ipv4Addr;

use arbitrary::Arbitrary;
use flowtally_core::config::TablePolicy;
use flowtally_probe::{Decision, Dispatcher, KeyScope, counter_table};
use libfuzzer_sys::fuzz_target;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 테이블 용량 (1..=64로 제한)
    capacity: u8,
    fixed: bool,
    destination_scope: bool,
    filter: Option<[u8; 4]>,
    /// 디스패치할 프레임 목록 (최대 32개로 제한)
    frames: Vec<Vec<u8>>,
}

fuzz_target!(|input: FuzzInput| {
    let capacity = usize::from(input.capacity % 64) + 1;
    let policy = if input.fixed {
        TablePolicy::Fixed
    } else {
        TablePolicy::Evict
    };
    let scope = if input.destination_scope {
        KeyScope::Destination
    } else {
        KeyScope::Flow
    };
    let table = counter_table(policy, capacity);
    let dispatcher = Dispatcher::new(table.clone(), scope, input.filter.map(Ipv4Addr::from));

    for frame in input.frames.iter().take(32) {
        let before: u64 = table.snapshot().iter().map(|(_, bytes)| *bytes).sum();
        let verdict = dispatcher.dispatch(frame);

        assert_eq!(verdict.decision, Decision::Pass);
        assert!(table.len() <= capacity);
        if !verdict.outcome.mutated_table() {
            let after: u64 = table.snapshot().iter().map(|(_, bytes)| *bytes).sum();
            assert_eq!(before, after);
        }
    }
});
