//! 흐름 키 생성: 파싱된 헤더를 호스트 바이트 오더 [`FlowKey`]로 정규화
//!
//! 와이어 필드는 빅 엔디언입니다. 두 주소와 두 포트 모두 이 모듈에서
//! 정확히 한 번 호스트 오더로 변환되며, 주소 필터 비교도 같은 값
//! (`u32::from(Ipv4Addr)`)을 사용합니다.

use std::net::Ipv4Addr;

use flowtally_common::{FlowKey, KEY_SCOPE_DESTINATION, KEY_SCOPE_FLOW};
use flowtally_core::config::ProbeMode;

use crate::parser::ParsedHeaders;

/// 키에 포함할 필드 범위
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyScope {
    /// 5-tuple 전체 (흐름 추적)
    #[default]
    Flow,
    /// 목적지 주소만 (주소 필터, 대상 주소당 단일 카운터)
    Destination,
}

impl KeyScope {
    /// 커널 전역 변수 `KEY_SCOPE` 값
    pub fn as_raw(self) -> u8 {
        match self {
            Self::Flow => KEY_SCOPE_FLOW,
            Self::Destination => KEY_SCOPE_DESTINATION,
        }
    }
}

impl From<ProbeMode> for KeyScope {
    fn from(mode: ProbeMode) -> Self {
        match mode {
            ProbeMode::Flow => Self::Flow,
            ProbeMode::Address => Self::Destination,
        }
    }
}

/// 와이어 주소를 호스트 오더 `u32`로 변환합니다.
pub fn host_order_addr(wire: [u8; 4]) -> u32 {
    u32::from_be_bytes(wire)
}

/// 와이어 포트를 호스트 오더 `u16`으로 변환합니다.
pub fn host_order_port(wire: [u8; 2]) -> u16 {
    u16::from_be_bytes(wire)
}

/// 필터 대상 주소를 키와 같은 오더로 변환합니다.
pub fn filter_value(addr: Ipv4Addr) -> u32 {
    u32::from(addr)
}

/// [`ParsedHeaders`]에서 [`FlowKey`]를 만드는 빌더
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowKeyBuilder {
    scope: KeyScope,
}

impl FlowKeyBuilder {
    /// 지정한 범위의 빌더를 생성합니다.
    pub fn new(scope: KeyScope) -> Self {
        Self { scope }
    }

    /// 현재 키 범위
    pub fn scope(&self) -> KeyScope {
        self.scope
    }

    /// 정규화된 키를 생성합니다.
    pub fn build(&self, headers: &ParsedHeaders) -> FlowKey {
        let dst_addr = host_order_addr(headers.dst_addr);
        match self.scope {
            KeyScope::Flow => FlowKey::new(
                host_order_addr(headers.src_addr),
                dst_addr,
                host_order_port(headers.src_port),
                host_order_port(headers.dst_port),
                headers.ip_protocol,
            ),
            KeyScope::Destination => FlowKey::destination(dst_addr),
        }
    }
}

/// 키의 출발지 주소를 `Ipv4Addr`로 되돌립니다.
pub fn src_ip(key: &FlowKey) -> Ipv4Addr {
    Ipv4Addr::from(key.src_addr)
}

/// 키의 목적지 주소를 `Ipv4Addr`로 되돌립니다.
pub fn dst_ip(key: &FlowKey) -> Ipv4Addr {
    Ipv4Addr::from(key.dst_addr)
}
