//! 엔진 설정: core [`ProbeConfig`]에서 테이블/키/필터 설정을 도출
//!
//! 두 가지 대표 구성을 제공합니다.
//!
//! | 구성 | 키 범위 | 정책 | 기본 용량 | 필터 |
//! |------|---------|------|-----------|------|
//! | [`EngineConfig::flow_tracker`] | 5-tuple | evict | 16 | 없음 |
//! | [`EngineConfig::address_filter`] | 목적지 주소 | fixed | 1024 | 대상 주소 |

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use flowtally_core::config::{
    DEFAULT_ADDRESS_CAPACITY, DEFAULT_FLOW_CAPACITY, ProbeConfig, ProbeMode, TablePolicy,
};
use flowtally_core::error::{ConfigError, FlowtallyError};

use crate::flow::KeyScope;

/// 프로브 엔진 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 키 구성 모드
    pub mode: ProbeMode,
    /// 테이블 최대 엔트리 수
    pub capacity: usize,
    /// 테이블 용량 정책
    pub policy: TablePolicy,
    /// 목적지 주소 필터
    pub filter_address: Option<Ipv4Addr>,
}

impl EngineConfig {
    /// 5-tuple 흐름 추적 구성 (LRU 16)
    pub fn flow_tracker() -> Self {
        Self {
            mode: ProbeMode::Flow,
            capacity: DEFAULT_FLOW_CAPACITY,
            policy: TablePolicy::Evict,
            filter_address: None,
        }
    }

    /// 단일 주소 필터 구성 (고정 1024)
    pub fn address_filter(addr: Ipv4Addr) -> Self {
        Self {
            mode: ProbeMode::Address,
            capacity: DEFAULT_ADDRESS_CAPACITY,
            policy: TablePolicy::Fixed,
            filter_address: Some(addr),
        }
    }

    /// core 설정에서 엔진 설정을 생성합니다.
    pub fn from_core(config: &ProbeConfig) -> Self {
        Self {
            mode: config.mode,
            capacity: config.effective_capacity(),
            policy: config.effective_policy(),
            filter_address: config.filter_address,
        }
    }

    /// 용량을 지정합니다.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// 정책을 지정합니다.
    pub fn with_policy(mut self, policy: TablePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 키 범위
    pub fn scope(&self) -> KeyScope {
        KeyScope::from(self.mode)
    }

    /// 설정 값을 검증합니다.
    ///
    /// # 에러
    /// - `probe.capacity`: 0이거나 `u32` 범위를 넘음
    /// - `probe.filter_address`: address 모드인데 필터가 없음
    pub fn validate(&self) -> Result<(), FlowtallyError> {
        if self.capacity == 0 || u32::try_from(self.capacity).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "probe.capacity".to_owned(),
                reason: format!("must be between 1 and {}", u32::MAX),
            }
            .into());
        }
        if self.mode == ProbeMode::Address && self.filter_address.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "probe.filter_address".to_owned(),
                reason: "address mode requires a filter address".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::flow_tracker()
    }
}
