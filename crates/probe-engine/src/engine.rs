//! 프로브 엔진: 카운터 테이블과 디스패처의 어태치 라이프사이클
//!
//! [`ProbeEngine`]은 테이블의 유일한 소유자입니다. `attach()`에서 테이블과
//! 디스패처를 만들고 `detach()`에서 폐기합니다. 외부 수집기는
//! [`TableReader`]로 스냅샷만 읽을 수 있으며, 리더는 약한 참조만 가지므로
//! 테이블 수명을 늘리지 않습니다.
//!
//! # 아키텍처
//! ```text
//! frames ──▶ Dispatcher ──update──▶ CounterTable ◀──snapshot── TableReader
//!            (per packet)          (Arc, owned)    (Weak)      (collector)
//! ```
//!
//! # 사용 예시
//! ```
//! use flowtally_probe::{EngineConfig, ProbeEngine, SnapshotSource};
//!
//! let mut engine = ProbeEngine::builder()
//!     .config(EngineConfig::flow_tracker())
//!     .build()?;
//! engine.attach()?;
//!
//! let verdict = engine.dispatcher()?.dispatch(&[0u8; 10]);
//! assert!(!verdict.outcome.mutated_table());
//!
//! let reader = engine.reader()?;
//! assert!(reader.snapshot()?.is_empty());
//!
//! engine.detach()?;
//! assert!(reader.snapshot().is_err());
//! # Ok::<(), flowtally_core::error::FlowtallyError>(())
//! ```

use std::sync::{Arc, Weak};

use tracing::{debug, info};

use flowtally_common::FlowKey;
use flowtally_core::config::TablePolicy;
use flowtally_core::error::{FlowtallyError, ProbeError};

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::table::{BoundedCounterMap, counter_table};

/// 테이블 스냅샷을 제공하는 읽기 전용 소스
///
/// 인메모리 테이블([`TableReader`])과 커널 맵(`KernelProbe`)이 구현합니다.
pub trait SnapshotSource {
    /// 현재 테이블 내용을 읽습니다.
    fn snapshot(&self) -> Result<Vec<(FlowKey, u64)>, ProbeError>;
}

/// 프로브 엔진
pub struct ProbeEngine {
    config: EngineConfig,
    dispatcher: Option<Dispatcher>,
}

/// 프로브 엔진 빌더
pub struct ProbeEngineBuilder {
    config: Option<EngineConfig>,
}

impl ProbeEngineBuilder {
    fn new() -> Self {
        Self { config: None }
    }

    /// 엔진 설정을 지정합니다.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 엔진을 생성합니다. 생성된 엔진은 아직 어태치되지 않은 상태입니다.
    ///
    /// # 에러
    /// - `ConfigError::InvalidValue`: 설정 검증 실패
    pub fn build(self) -> Result<ProbeEngine, FlowtallyError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(ProbeEngine {
            config,
            dispatcher: None,
        })
    }
}

impl ProbeEngine {
    /// 빌더를 반환합니다.
    pub fn builder() -> ProbeEngineBuilder {
        ProbeEngineBuilder::new()
    }

    /// 현재 설정을 반환합니다.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 어태치 여부
    pub fn is_attached(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// 테이블과 디스패처를 생성합니다.
    ///
    /// # 에러
    /// - `ProbeError::AlreadyAttached`: 이미 어태치된 경우
    pub fn attach(&mut self) -> Result<(), FlowtallyError> {
        if self.dispatcher.is_some() {
            return Err(ProbeError::AlreadyAttached.into());
        }

        let table = counter_table(self.config.policy, self.config.capacity);
        info!(
            mode = self.config.mode.as_str(),
            policy = self.config.policy.as_str(),
            capacity = table.capacity(),
            filter = ?self.config.filter_address,
            "attaching probe"
        );

        self.dispatcher = Some(Dispatcher::new(
            table,
            self.config.scope(),
            self.config.filter_address,
        ));
        Ok(())
    }

    /// 디스패처와 테이블을 폐기합니다.
    ///
    /// 기존 [`TableReader`]는 이후 `ProbeError::NotAttached`를 반환합니다.
    ///
    /// # 에러
    /// - `ProbeError::NotAttached`: 어태치되지 않은 경우
    pub fn detach(&mut self) -> Result<(), FlowtallyError> {
        let dispatcher = self.dispatcher.take().ok_or(ProbeError::NotAttached)?;
        info!(entries = dispatcher.table().len(), "detaching probe");
        drop(dispatcher);
        Ok(())
    }

    /// 패킷 디스패처를 반환합니다.
    ///
    /// 반환된 참조는 엔진을 빌리므로 `detach()`보다 오래 살 수 없습니다.
    /// [`Dispatcher`]는 `Clone`이 아니므로 테이블을 소유한 사본도 만들 수 없습니다.
    ///
    /// ```compile_fail
    /// use flowtally_probe::ProbeEngine;
    ///
    /// let mut engine = ProbeEngine::builder().build().unwrap();
    /// engine.attach().unwrap();
    /// let escaped = engine.dispatcher().unwrap().clone();
    /// engine.detach().unwrap();
    /// escaped.dispatch(&[]);
    /// ```
    pub fn dispatcher(&self) -> Result<&Dispatcher, ProbeError> {
        self.dispatcher.as_ref().ok_or(ProbeError::NotAttached)
    }

    /// 테이블 읽기 핸들을 반환합니다.
    pub fn reader(&self) -> Result<TableReader, ProbeError> {
        let dispatcher = self.dispatcher()?;
        debug!("table reader created");
        Ok(TableReader {
            table: Arc::downgrade(dispatcher.table()),
            capacity: dispatcher.table().capacity(),
            policy: dispatcher.table().policy(),
        })
    }
}

/// 카운터 테이블 읽기 전용 핸들
///
/// 쓰기와 삭제 권한이 없으며 테이블 수명을 연장하지 않습니다.
#[derive(Debug, Clone)]
pub struct TableReader {
    table: Weak<dyn BoundedCounterMap>,
    capacity: usize,
    policy: TablePolicy,
}

impl TableReader {
    /// 테이블 최대 엔트리 수
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 테이블 정책
    pub fn policy(&self) -> TablePolicy {
        self.policy
    }

    /// 테이블이 아직 살아 있는지 여부
    pub fn is_attached(&self) -> bool {
        self.table.strong_count() > 0
    }
}

impl SnapshotSource for TableReader {
    fn snapshot(&self) -> Result<Vec<(FlowKey, u64)>, ProbeError> {
        let table = self.table.upgrade().ok_or(ProbeError::NotAttached)?;
        Ok(table.snapshot())
    }
}
