#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`parser`]: 헤더 파서
//! - [`flow`]: 흐름 키 생성
//! - [`table`]: 바운드 카운터 테이블 ([`BoundedCounterMap`])
//! - [`dispatcher`]: 패킷 단위 상태 기계
//! - [`config`]: core 설정 확장
//! - [`engine`]: ProbeEngine: 테이블 라이프사이클
//! - [`stats`]: 흐름 리포트
//! - [`kernel`]: XDP 로더
//!
//! # 공유 타입
//! 커널/유저스페이스 공유 타입은 [`flowtally_common`] 크레이트에 정의되어 있습니다.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod flow;
pub mod kernel;
pub mod parser;
pub mod stats;
pub mod table;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// --- 주요 타입 re-export ---

// 엔진
pub use engine::{ProbeEngine, ProbeEngineBuilder, SnapshotSource, TableReader};
pub use kernel::KernelProbe;

// 설정
pub use config::EngineConfig;

// 패킷 경로
pub use dispatcher::{Decision, DispatchState, Dispatcher, Outcome, Verdict};
pub use flow::{FlowKeyBuilder, KeyScope};
pub use parser::{Layer, ParseError, ParsedHeaders, parse_headers};
pub use table::{
    BoundedCounterMap, FixedCounterTable, LruCounterTable, UpdateOutcome, counter_table,
};

// 통계
pub use stats::{FlowReport, FlowRow, FlowStats, protocol_name};

// 공유 타입 (커널/유저스페이스 공통)
pub use flowtally_common;
pub use flowtally_common::FlowKey;
