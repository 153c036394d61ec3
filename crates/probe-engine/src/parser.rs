//! 헤더 파서: Ethernet / IPv4 / TCP·UDP 헤더의 경계 검사 추출
//!
//! 모든 헤더 접근은 [`read_array`] / [`header`] 접근자를 거치며, 두 함수 모두
//! 버퍼 길이를 먼저 확인한 뒤 `Option`을 반환합니다. 버퍼 레이아웃을
//! 길이 확인 없이 신뢰하는 경로는 없습니다.
//!
//! 파서는 와이어 바이트를 해석하지 않고 그대로 보존합니다.
//! 바이트 오더 정규화는 [`crate::flow`]에서 한 번만 수행됩니다.
//!
//! ```text
//! 0        14                 14+IHL*4
//! ┌────────┬──────────────────┬──────────────┐
//! │ Ether  │ IPv4 (IHL words) │ TCP 20 / UDP 8│
//! └────────┴──────────────────┴──────────────┘
//! ```

use std::fmt;

use flowtally_common::{
    ETH_HDR_LEN, ETH_P_IPV4, ETH_TYPE_OFFSET, IPV4_DST_OFFSET, IPV4_MIN_HDR_LEN,
    IPV4_PROTO_OFFSET, IPV4_SRC_OFFSET, PROTO_TCP, PROTO_UDP, TCP_HDR_LEN, UDP_HDR_LEN,
};

/// 파싱 중인 헤더 계층
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Ethernet II
    Ethernet,
    /// IPv4
    Ipv4,
    /// TCP 또는 UDP
    Transport,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ethernet => f.write_str("ethernet"),
            Self::Ipv4 => f.write_str("ipv4"),
            Self::Transport => f.write_str("transport"),
        }
    }
}

/// 패킷 단위 파싱 실패
///
/// 두 경우 모두 치명적이지 않으며, 디스패처는 테이블을 건드리지 않고
/// 패킷을 통과시킵니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// 해당 계층의 헤더를 담기에 버퍼가 짧음
    #[error("truncated {0} header")]
    Truncated(Layer),

    /// 처리하지 않는 링크/네트워크 계층 타입
    #[error("unsupported {0} header")]
    Unsupported(Layer),
}

/// 추출된 헤더 필드
///
/// 주소와 포트는 와이어(빅 엔디언) 바이트 그대로입니다.
/// TCP/UDP가 아닌 프로토콜이면 포트 바이트는 0입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeaders {
    /// EtherType (호스트 오더, 항상 `ETH_P_IPV4`)
    pub ether_type: u16,
    /// IP 프로토콜 번호
    pub ip_protocol: u8,
    /// 출발지 주소 (와이어 바이트)
    pub src_addr: [u8; 4],
    /// 목적지 주소 (와이어 바이트)
    pub dst_addr: [u8; 4],
    /// 출발지 포트 (와이어 바이트)
    pub src_port: [u8; 2],
    /// 목적지 포트 (와이어 바이트)
    pub dst_port: [u8; 2],
}

/// `offset`에서 `N`바이트를 고정 크기 배열로 읽습니다.
///
/// 버퍼에 `offset + N`바이트가 없으면 `None`을 반환합니다.
pub fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    buf.get(offset..end)?.try_into().ok()
}

/// `offset`에서 시작하는 `len`바이트 헤더 슬라이스를 반환합니다.
pub fn header(buf: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    buf.get(offset..end)
}

/// 원시 프레임에서 헤더를 순차적으로 추출합니다.
///
/// # 에러
/// - `Truncated(Ethernet)`: 14바이트 미만
/// - `Unsupported(Ethernet)`: EtherType이 IPv4가 아님
/// - `Truncated(Ipv4)`: 최소 헤더 또는 IHL이 가리키는 헤더가 버퍼를 넘음
/// - `Unsupported(Ipv4)`: 버전이 4가 아니거나 IHL < 5
/// - `Truncated(Transport)`: TCP/UDP 헤더가 버퍼를 넘음
pub fn parse_headers(frame: &[u8]) -> Result<ParsedHeaders, ParseError> {
    let eth: [u8; ETH_HDR_LEN] =
        read_array(frame, 0).ok_or(ParseError::Truncated(Layer::Ethernet))?;
    let ether_type = u16::from_be_bytes([eth[ETH_TYPE_OFFSET], eth[ETH_TYPE_OFFSET + 1]]);
    if ether_type != ETH_P_IPV4 {
        return Err(ParseError::Unsupported(Layer::Ethernet));
    }

    let ip: [u8; IPV4_MIN_HDR_LEN] =
        read_array(frame, ETH_HDR_LEN).ok_or(ParseError::Truncated(Layer::Ipv4))?;
    let version = ip[0] >> 4;
    let ihl = usize::from(ip[0] & 0x0f);
    if version != 4 || ihl * 4 < IPV4_MIN_HDR_LEN {
        return Err(ParseError::Unsupported(Layer::Ipv4));
    }
    let ip_hdr_len = ihl * 4;
    // 옵션을 포함한 전체 IPv4 헤더가 버퍼 안에 있어야 함
    header(frame, ETH_HDR_LEN, ip_hdr_len).ok_or(ParseError::Truncated(Layer::Ipv4))?;

    let ip_protocol = ip[IPV4_PROTO_OFFSET];
    let src_addr = [
        ip[IPV4_SRC_OFFSET],
        ip[IPV4_SRC_OFFSET + 1],
        ip[IPV4_SRC_OFFSET + 2],
        ip[IPV4_SRC_OFFSET + 3],
    ];
    let dst_addr = [
        ip[IPV4_DST_OFFSET],
        ip[IPV4_DST_OFFSET + 1],
        ip[IPV4_DST_OFFSET + 2],
        ip[IPV4_DST_OFFSET + 3],
    ];

    let (src_port, dst_port) = match transport_header_len(ip_protocol) {
        Some(l4_len) => {
            let l4 = header(frame, ETH_HDR_LEN + ip_hdr_len, l4_len)
                .ok_or(ParseError::Truncated(Layer::Transport))?;
            // TCP와 UDP 모두 처음 4바이트가 출발지/목적지 포트
            let ports: [u8; 4] =
                read_array(l4, 0).ok_or(ParseError::Truncated(Layer::Transport))?;
            ([ports[0], ports[1]], [ports[2], ports[3]])
        }
        None => ([0; 2], [0; 2]),
    };

    Ok(ParsedHeaders {
        ether_type,
        ip_protocol,
        src_addr,
        dst_addr,
        src_port,
        dst_port,
    })
}

/// 포트를 추출하는 전송 계층의 최소 헤더 길이
fn transport_header_len(protocol: u8) -> Option<usize> {
    match protocol {
        PROTO_TCP => Some(TCP_HDR_LEN),
        PROTO_UDP => Some(UDP_HDR_LEN),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FrameBuilder;
    use flowtally_common::PROTO_ICMP;

    #[test]
    fn parses_tcp_frame() {
        let frame = FrameBuilder::tcp([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80).build();
        let headers = parse_headers(&frame).unwrap();
        assert_eq!(headers.ether_type, ETH_P_IPV4);
        assert_eq!(headers.ip_protocol, PROTO_TCP);
        assert_eq!(headers.src_addr, [10, 0, 0, 1]);
        assert_eq!(headers.dst_addr, [10, 0, 0, 2]);
        assert_eq!(headers.src_port, 1234u16.to_be_bytes());
        assert_eq!(headers.dst_port, 80u16.to_be_bytes());
    }

    #[test]
    fn parses_udp_frame_with_minimum_header() {
        let frame = FrameBuilder::udp([192, 168, 0, 1], 5353, [224, 0, 0, 251], 5353).build();
        assert_eq!(frame.len(), 14 + 20 + 8);
        let headers = parse_headers(&frame).unwrap();
        assert_eq!(headers.ip_protocol, PROTO_UDP);
        assert_eq!(headers.dst_port, 5353u16.to_be_bytes());
    }

    #[test]
    fn non_transport_protocol_has_zero_ports() {
        let frame = FrameBuilder::ip([10, 0, 0, 1], [10, 0, 0, 2], PROTO_ICMP)
            .payload(64)
            .build();
        let headers = parse_headers(&frame).unwrap();
        assert_eq!(headers.ip_protocol, PROTO_ICMP);
        assert_eq!(headers.src_port, [0, 0]);
        assert_eq!(headers.dst_port, [0, 0]);
    }

    #[test]
    fn honors_ip_options_when_locating_transport_header() {
        let frame = FrameBuilder::tcp([10, 0, 0, 1], 4000, [10, 0, 0, 2], 443)
            .ip_options(8)
            .build();
        let headers = parse_headers(&frame).unwrap();
        assert_eq!(headers.src_port, 4000u16.to_be_bytes());
        assert_eq!(headers.dst_port, 443u16.to_be_bytes());
    }

    #[test]
    fn short_buffer_is_truncated_ethernet() {
        assert_eq!(
            parse_headers(&[0u8; 10]),
            Err(ParseError::Truncated(Layer::Ethernet))
        );
        assert_eq!(
            parse_headers(&[]),
            Err(ParseError::Truncated(Layer::Ethernet))
        );
    }

    #[test]
    fn arp_is_unsupported() {
        let frame = FrameBuilder::arp().build();
        assert_eq!(
            parse_headers(&frame),
            Err(ParseError::Unsupported(Layer::Ethernet))
        );
    }

    #[test]
    fn missing_ip_header_is_truncated() {
        let frame = FrameBuilder::tcp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2).build();
        assert_eq!(
            parse_headers(&frame[..30]),
            Err(ParseError::Truncated(Layer::Ipv4))
        );
    }

    #[test]
    fn ip_options_past_buffer_end_are_truncated() {
        let frame = FrameBuilder::ip([10, 0, 0, 1], [10, 0, 0, 2], PROTO_ICMP)
            .ip_options(20)
            .build();
        // 최소 헤더는 있지만 IHL이 가리키는 옵션이 잘림
        assert_eq!(
            parse_headers(&frame[..14 + 24]),
            Err(ParseError::Truncated(Layer::Ipv4))
        );
    }

    #[test]
    fn bad_version_or_ihl_is_unsupported() {
        let mut frame = FrameBuilder::tcp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2).build();
        frame[14] = 0x65;
        assert_eq!(
            parse_headers(&frame),
            Err(ParseError::Unsupported(Layer::Ipv4))
        );

        frame[14] = 0x44;
        assert_eq!(
            parse_headers(&frame),
            Err(ParseError::Unsupported(Layer::Ipv4))
        );
    }

    #[test]
    fn truncated_tcp_header() {
        let frame = FrameBuilder::tcp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2).build();
        // TCP 헤더 20바이트 중 19바이트만 존재
        assert_eq!(
            parse_headers(&frame[..14 + 20 + 19]),
            Err(ParseError::Truncated(Layer::Transport))
        );
    }

    #[test]
    fn truncated_udp_header() {
        let frame = FrameBuilder::udp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2).build();
        assert_eq!(
            parse_headers(&frame[..14 + 20 + 4]),
            Err(ParseError::Truncated(Layer::Transport))
        );
    }

    #[test]
    fn every_prefix_of_a_valid_frame_is_handled() {
        let frame = FrameBuilder::tcp([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80)
            .ip_options(12)
            .build();
        let full = 14 + 32 + 20;
        for len in 0..=frame.len() {
            let result = parse_headers(&frame[..len]);
            if len < full {
                assert!(
                    matches!(result, Err(ParseError::Truncated(_))),
                    "prefix of {len} bytes should be truncated"
                );
            } else {
                assert!(result.is_ok());
            }
        }
    }

    #[test]
    fn read_array_checks_bounds() {
        let buf = [1u8, 2, 3];
        assert_eq!(read_array::<2>(&buf, 1), Some([2, 3]));
        assert_eq!(read_array::<2>(&buf, 2), None);
        assert_eq!(read_array::<1>(&buf, usize::MAX), None);
    }
}
