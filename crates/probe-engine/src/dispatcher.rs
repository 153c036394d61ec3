//! 디스패처: 패킷 단위 처리 상태 기계
//!
//! ```text
//!          parse 실패 / 필터 불일치 / 테이블 가득 참
//!   ┌──────┐ ───────────────────────────────────────▶ ┌──────┐
//!   │ Scan │                                           │ Done │ → Decision::Pass
//!   └──────┘ ── parse → (filter) → key → update ─────▶ └──────┘
//! ```
//!
//! 모든 경로는 `Done`에 도달하며 결정은 항상 [`Decision::Pass`]입니다.
//! 패킷 단위 경로는 로그나 메트릭을 남기지 않습니다.
//! 락은 테이블 갱신 중에만 잡습니다.

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::flow::{FlowKeyBuilder, KeyScope, filter_value, host_order_addr};
use crate::parser::{Layer, ParseError, parse_headers};
use crate::table::{BoundedCounterMap, UpdateOutcome};

/// 포워딩 결정
///
/// 이 프로브는 관측만 하므로 변형은 `Pass` 하나뿐입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 패킷을 변경 없이 통과
    Pass,
}

/// 패킷 처리 결과 (정보용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 카운터가 갱신 또는 생성됨
    Counted,
    /// 다른 엔트리를 축출하고 카운터를 생성함
    Evicted,
    /// 헤더가 버퍼에 다 들어 있지 않음
    Truncated(Layer),
    /// 처리하지 않는 프로토콜
    Unsupported(Layer),
    /// 목적지 주소가 필터와 다름
    Filtered,
    /// 고정 테이블이 가득 차서 관측값을 버림
    TableFull,
}

impl Outcome {
    /// 테이블을 변경한 결과인지 여부
    pub fn mutated_table(&self) -> bool {
        matches!(self, Self::Counted | Self::Evicted)
    }
}

impl From<ParseError> for Outcome {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Truncated(layer) => Self::Truncated(layer),
            ParseError::Unsupported(layer) => Self::Unsupported(layer),
        }
    }
}

impl From<UpdateOutcome> for Outcome {
    fn from(outcome: UpdateOutcome) -> Self {
        match outcome {
            UpdateOutcome::Updated | UpdateOutcome::Inserted => Self::Counted,
            UpdateOutcome::Evicted(_) => Self::Evicted,
            UpdateOutcome::Rejected => Self::TableFull,
        }
    }
}

/// 디스패치 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// 포워딩 결정 (항상 `Pass`)
    pub decision: Decision,
    /// 처리 결과
    pub outcome: Outcome,
}

impl Verdict {
    fn pass(outcome: Outcome) -> Self {
        Self {
            decision: Decision::Pass,
            outcome,
        }
    }
}

/// 디스패치 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// 패킷당 한 번 진입하는 초기 상태
    Scan,
    /// 종료 상태
    Done(Outcome),
}

/// 패킷 단위 디스패처
///
/// `Send + Sync`이며 여러 수신 컨텍스트에서 동시에 호출할 수 있습니다.
/// 테이블의 유일한 소유자이므로 복제할 수 없습니다.
#[derive(Debug)]
pub struct Dispatcher {
    table: Arc<dyn BoundedCounterMap>,
    keys: FlowKeyBuilder,
    /// 호스트 오더 목적지 주소 필터
    filter: Option<u32>,
}

impl Dispatcher {
    /// 디스패처를 생성합니다.
    pub fn new(
        table: Arc<dyn BoundedCounterMap>,
        scope: KeyScope,
        filter_address: Option<Ipv4Addr>,
    ) -> Self {
        Self {
            table,
            keys: FlowKeyBuilder::new(scope),
            filter: filter_address.map(filter_value),
        }
    }

    /// 카운터 테이블
    pub(crate) fn table(&self) -> &Arc<dyn BoundedCounterMap> {
        &self.table
    }

    /// 설정된 필터 주소
    pub fn filter_address(&self) -> Option<Ipv4Addr> {
        self.filter.map(Ipv4Addr::from)
    }

    /// 키 범위
    pub fn scope(&self) -> KeyScope {
        self.keys.scope()
    }

    /// 프레임 하나를 처리합니다.
    ///
    /// 프레임 길이는 버퍼 전체 길이입니다.
    pub fn dispatch(&self, frame: &[u8]) -> Verdict {
        let mut state = DispatchState::Scan;
        loop {
            match state {
                DispatchState::Scan => state = self.step(frame),
                DispatchState::Done(outcome) => return Verdict::pass(outcome),
            }
        }
    }

    /// `Scan` 상태에서 한 단계 진행합니다. 결과는 항상 `Done`입니다.
    pub fn step(&self, frame: &[u8]) -> DispatchState {
        let headers = match parse_headers(frame) {
            Ok(headers) => headers,
            Err(err) => return DispatchState::Done(err.into()),
        };

        if let Some(target) = self.filter {
            if host_order_addr(headers.dst_addr) != target {
                return DispatchState::Done(Outcome::Filtered);
            }
        }

        let key = self.keys.build(&headers);
        let frame_len = u64::try_from(frame.len()).unwrap_or(u64::MAX);
        DispatchState::Done(self.table.update(key, frame_len).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::counter_table;
    use crate::testing::FrameBuilder;
    use flowtally_common::FlowKey;
    use flowtally_core::config::TablePolicy;

    fn flow_dispatcher() -> Dispatcher {
        Dispatcher::new(counter_table(TablePolicy::Evict, 16), KeyScope::Flow, None)
    }

    #[test]
    fn counts_frame_length_not_payload_length() {
        let dispatcher = flow_dispatcher();
        let frame = FrameBuilder::tcp([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80)
            .total_len(74)
            .build();

        let verdict = dispatcher.dispatch(&frame);
        assert_eq!(verdict.decision, Decision::Pass);
        assert_eq!(verdict.outcome, Outcome::Counted);
        let (_, bytes) = dispatcher.table().snapshot()[0];
        assert_eq!(bytes, 74);
    }

    #[test]
    fn parse_failure_is_pass_without_mutation() {
        let dispatcher = flow_dispatcher();

        let verdict = dispatcher.dispatch(&[0u8; 10]);
        assert_eq!(verdict.decision, Decision::Pass);
        assert_eq!(verdict.outcome, Outcome::Truncated(Layer::Ethernet));

        let verdict = dispatcher.dispatch(&FrameBuilder::arp().build());
        assert_eq!(verdict.outcome, Outcome::Unsupported(Layer::Ethernet));
        assert!(!verdict.outcome.mutated_table());
        assert!(dispatcher.table().is_empty());
    }

    #[test]
    fn filter_mismatch_is_pass_without_mutation() {
        let target = Ipv4Addr::new(185, 79, 97, 55);
        let dispatcher = Dispatcher::new(
            counter_table(TablePolicy::Fixed, 1024),
            KeyScope::Destination,
            Some(target),
        );

        let miss = FrameBuilder::tcp([10, 0, 0, 1], 1, [10, 0, 0, 9], 2).build();
        assert_eq!(dispatcher.dispatch(&miss).outcome, Outcome::Filtered);
        assert!(dispatcher.table().is_empty());

        let hit = FrameBuilder::tcp([10, 0, 0, 1], 1, [185, 79, 97, 55], 2).build();
        assert_eq!(dispatcher.dispatch(&hit).outcome, Outcome::Counted);
        assert_eq!(
            dispatcher.table().get(&FlowKey::destination(u32::from(target))),
            Some(hit.len() as u64)
        );
        assert_eq!(dispatcher.filter_address(), Some(target));
    }

    #[test]
    fn full_fixed_table_reports_table_full() {
        let dispatcher = Dispatcher::new(counter_table(TablePolicy::Fixed, 1), KeyScope::Flow, None);
        let a = FrameBuilder::udp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2).build();
        let b = FrameBuilder::udp([10, 0, 0, 3], 1, [10, 0, 0, 2], 2).build();

        assert_eq!(dispatcher.dispatch(&a).outcome, Outcome::Counted);
        let verdict = dispatcher.dispatch(&b);
        assert_eq!(verdict.decision, Decision::Pass);
        assert_eq!(verdict.outcome, Outcome::TableFull);
    }

    #[test]
    fn full_lru_table_reports_eviction() {
        let dispatcher = Dispatcher::new(counter_table(TablePolicy::Evict, 1), KeyScope::Flow, None);
        let a = FrameBuilder::udp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2).build();
        let b = FrameBuilder::udp([10, 0, 0, 3], 1, [10, 0, 0, 2], 2).build();

        dispatcher.dispatch(&a);
        assert_eq!(dispatcher.dispatch(&b).outcome, Outcome::Evicted);
        assert_eq!(dispatcher.table().len(), 1);
    }

    #[test]
    fn step_from_scan_always_reaches_done() {
        let dispatcher = flow_dispatcher();
        for frame in [vec![], vec![0xff; 13], FrameBuilder::arp().build()] {
            assert!(matches!(dispatcher.step(&frame), DispatchState::Done(_)));
        }
    }

    #[test]
    fn dispatcher_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Dispatcher>();
    }
}
