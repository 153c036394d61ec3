//! XDP 커널/유저스페이스 공유 타입
//!
//! 이 크레이트는 `#![no_std]` 환경에서 사용 가능한 공통 타입을 정의합니다.
//! XDP 프로그램과 유저스페이스가 동일한 메모리 레이아웃(`#[repr(C)]`)을
//! 사용하도록 보장합니다.
//!
//! # 맵 타입 선택 근거
//! - **LruHashMap** (`FLOW_STATS_LRU`): 5-tuple 흐름 추적. 가득 차면 커널이
//!   가장 오래 접근되지 않은 엔트리를 축출
//! - **HashMap** (`FLOW_STATS_FIXED`): 주소 필터. 가득 차면 새 키 삽입이 실패하고
//!   기존 키만 갱신됨
//!
//! 어떤 맵을 갱신할지는 로드 시점 전역 변수(`POLICY`)로 결정됩니다.

#![no_std]

// =============================================================================
// 맵 / 전역 변수 이름 상수
// =============================================================================

/// LRU 축출 정책 카운터 맵 이름
pub const MAP_FLOW_STATS_LRU: &str = "FLOW_STATS_LRU";
/// 고정 용량 정책 카운터 맵 이름
pub const MAP_FLOW_STATS_FIXED: &str = "FLOW_STATS_FIXED";

/// 목적지 주소 필터 활성화 여부 전역 변수 (`u8`, 0 또는 1)
pub const GLOBAL_FILTER_ENABLED: &str = "FILTER_ENABLED";
/// 목적지 주소 필터 값 전역 변수 (`u32`, 호스트 바이트 오더)
pub const GLOBAL_FILTER_ADDR: &str = "FILTER_ADDR";
/// 키 범위 전역 변수 (`u8`, `KEY_SCOPE_*`)
pub const GLOBAL_KEY_SCOPE: &str = "KEY_SCOPE";
/// 테이블 정책 전역 변수 (`u8`, `POLICY_*`)
pub const GLOBAL_POLICY: &str = "POLICY";

/// XDP 프로그램 이름
pub const PROGRAM_NAME: &str = "flowtally_xdp";

// =============================================================================
// 헤더 레이아웃 상수 (유저스페이스 파서용)
// =============================================================================
// XDP 프로그램은 `network-types` 헤더 구조체로 같은 필드를 읽습니다.

/// Ethernet 헤더 길이
pub const ETH_HDR_LEN: usize = 14;
/// Ethernet 헤더 내 EtherType 오프셋
pub const ETH_TYPE_OFFSET: usize = 12;
/// IPv4 EtherType
pub const ETH_P_IPV4: u16 = 0x0800;

/// IPv4 최소 헤더 길이 (IHL = 5)
pub const IPV4_MIN_HDR_LEN: usize = 20;
/// IPv4 헤더 내 프로토콜 오프셋
pub const IPV4_PROTO_OFFSET: usize = 9;
/// IPv4 헤더 내 출발지 주소 오프셋
pub const IPV4_SRC_OFFSET: usize = 12;
/// IPv4 헤더 내 목적지 주소 오프셋
pub const IPV4_DST_OFFSET: usize = 16;

/// TCP 최소 헤더 길이
pub const TCP_HDR_LEN: usize = 20;
/// UDP 헤더 길이
pub const UDP_HDR_LEN: usize = 8;

// =============================================================================
// 프로토콜 상수
// =============================================================================

/// ICMP 프로토콜 번호
pub const PROTO_ICMP: u8 = 1;
/// TCP 프로토콜 번호
pub const PROTO_TCP: u8 = 6;
/// UDP 프로토콜 번호
pub const PROTO_UDP: u8 = 17;

// =============================================================================
// 로드 시점 설정 값
// =============================================================================

/// 5-tuple 전체를 키로 사용
pub const KEY_SCOPE_FLOW: u8 = 0;
/// 목적지 주소만 키로 사용
pub const KEY_SCOPE_DESTINATION: u8 = 1;

/// LRU 축출 맵 사용
pub const POLICY_EVICT: u8 = 0;
/// 고정 용량 맵 사용
pub const POLICY_FIXED: u8 = 1;

/// LRU 맵 기본 max_entries
pub const DEFAULT_LRU_ENTRIES: u32 = 16;
/// 고정 맵 기본 max_entries
pub const DEFAULT_FIXED_ENTRIES: u32 = 1024;

// =============================================================================
// 공유 데이터 구조
// =============================================================================

/// 흐름 식별 키
///
/// 모든 주소/포트 필드는 **호스트 바이트 오더**로 저장됩니다.
/// 커널 맵은 키의 원시 바이트를 해시하므로 `_pad`는 항상 0이어야 합니다.
///
/// # 메모리 레이아웃 (16 바이트, 4바이트 정렬)
/// ```text
/// offset  field       size
/// 0       src_addr    4
/// 4       dst_addr    4
/// 8       src_port    2
/// 10      dst_port    2
/// 12      protocol    1
/// 13      _pad        3
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// 출발지 IPv4 주소
    pub src_addr: u32,
    /// 목적지 IPv4 주소
    pub dst_addr: u32,
    /// 출발지 포트 (TCP/UDP 외 프로토콜은 0)
    pub src_port: u16,
    /// 목적지 포트 (TCP/UDP 외 프로토콜은 0)
    pub dst_port: u16,
    /// IP 프로토콜 번호
    pub protocol: u8,
    /// 4바이트 정렬을 위한 패딩
    pub _pad: [u8; 3],
}

impl FlowKey {
    /// 5-tuple 키를 생성합니다.
    pub const fn new(
        src_addr: u32,
        dst_addr: u32,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self {
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            protocol,
            _pad: [0; 3],
        }
    }

    /// 목적지 주소만 채운 키를 생성합니다.
    pub const fn destination(dst_addr: u32) -> Self {
        Self::new(0, dst_addr, 0, 0, 0)
    }
}

// SAFETY: FlowKey는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
// 패딩은 명시적 필드로 정의되어 있어 초기화되지 않은 바이트가 없습니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for FlowKey {}
