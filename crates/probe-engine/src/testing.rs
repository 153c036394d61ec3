//! 테스트/벤치용 Ethernet 프레임 빌더
//!
//! 체크섬은 계산하지 않습니다. 파서는 체크섬을 검증하지 않습니다.

use flowtally_common::{ETH_HDR_LEN, ETH_P_IPV4, IPV4_MIN_HDR_LEN, PROTO_TCP, PROTO_UDP};

const ETH_P_ARP: u16 = 0x0806;
const ARP_BODY_LEN: usize = 28;

#[derive(Debug, Clone)]
enum Body {
    Ipv4 {
        src: [u8; 4],
        dst: [u8; 4],
        protocol: u8,
        src_port: u16,
        dst_port: u16,
        options: usize,
    },
    Arp,
}

/// 합성 Ethernet 프레임 빌더
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    body: Body,
    payload: usize,
    total_len: Option<usize>,
}

impl FrameBuilder {
    /// Ethernet + IPv4 + TCP 프레임
    pub fn tcp(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> Self {
        Self::transport(src, src_port, dst, dst_port, PROTO_TCP)
    }

    /// Ethernet + IPv4 + UDP 프레임
    pub fn udp(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> Self {
        Self::transport(src, src_port, dst, dst_port, PROTO_UDP)
    }

    /// 전송 계층 헤더 없이 임의 프로토콜 번호를 가진 IPv4 프레임
    pub fn ip(src: [u8; 4], dst: [u8; 4], protocol: u8) -> Self {
        Self::transport(src, 0, dst, 0, protocol)
    }

    /// ARP 요청 프레임
    pub fn arp() -> Self {
        Self {
            body: Body::Arp,
            payload: 0,
            total_len: None,
        }
    }

    fn transport(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16, protocol: u8) -> Self {
        Self {
            body: Body::Ipv4 {
                src,
                dst,
                protocol,
                src_port,
                dst_port,
                options: 0,
            },
            payload: 0,
            total_len: None,
        }
    }

    /// IPv4 옵션 바이트 수 (4의 배수로 올림, 최대 40)
    pub fn ip_options(mut self, len: usize) -> Self {
        if let Body::Ipv4 { options, .. } = &mut self.body {
            *options = len.div_ceil(4).min(10) * 4;
        }
        self
    }

    /// 헤더 뒤에 붙일 페이로드 바이트 수
    pub fn payload(mut self, len: usize) -> Self {
        self.payload = len;
        self
    }

    /// 전체 프레임 길이를 맞추도록 페이로드를 채움
    ///
    /// 헤더만으로 `len`을 넘으면 헤더 길이가 그대로 유지됩니다.
    pub fn total_len(mut self, len: usize) -> Self {
        self.total_len = Some(len);
        self
    }

    /// 프레임 바이트를 생성합니다.
    pub fn build(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(128);
        frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
        frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

        match &self.body {
            Body::Arp => {
                frame.extend_from_slice(&ETH_P_ARP.to_be_bytes());
                frame.extend_from_slice(&[0u8; ARP_BODY_LEN]);
            }
            Body::Ipv4 {
                src,
                dst,
                protocol,
                src_port,
                dst_port,
                options,
            } => {
                frame.extend_from_slice(&ETH_P_IPV4.to_be_bytes());
                let l4 = transport_bytes(*protocol, *src_port, *dst_port);
                let ip_len = IPV4_MIN_HDR_LEN + options;
                let headers_len = ETH_HDR_LEN + ip_len + l4.len();
                let payload = match self.total_len {
                    Some(total) => total.saturating_sub(headers_len),
                    None => self.payload,
                };
                let ip_total = u16::try_from(ip_len + l4.len() + payload).unwrap_or(u16::MAX);

                // ip_len은 최대 60이므로 IHL은 4비트에 들어감
                let ihl = u8::try_from(ip_len / 4).unwrap_or(0x0f);
                frame.push(0x40 | ihl);
                frame.push(0);
                frame.extend_from_slice(&ip_total.to_be_bytes());
                frame.extend_from_slice(&[0, 0, 0x40, 0]);
                frame.push(64);
                frame.push(*protocol);
                frame.extend_from_slice(&[0, 0]);
                frame.extend_from_slice(src);
                frame.extend_from_slice(dst);
                frame.resize(frame.len() + options, 0);
                frame.extend_from_slice(&l4);
                frame.resize(frame.len() + payload, 0xab);
                return frame;
            }
        }

        if let Some(total) = self.total_len {
            if total > frame.len() {
                frame.resize(total, 0);
            }
        } else {
            frame.resize(frame.len() + self.payload, 0);
        }
        frame
    }
}

fn transport_bytes(protocol: u8, src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut l4 = Vec::with_capacity(20);
    match protocol {
        PROTO_TCP => {
            l4.extend_from_slice(&src_port.to_be_bytes());
            l4.extend_from_slice(&dst_port.to_be_bytes());
            l4.extend_from_slice(&[0; 8]);
            // data offset 5, SYN
            l4.extend_from_slice(&[0x50, 0x02]);
            l4.extend_from_slice(&0xffffu16.to_be_bytes());
            l4.extend_from_slice(&[0; 4]);
        }
        PROTO_UDP => {
            l4.extend_from_slice(&src_port.to_be_bytes());
            l4.extend_from_slice(&dst_port.to_be_bytes());
            l4.extend_from_slice(&8u16.to_be_bytes());
            l4.extend_from_slice(&[0; 2]);
        }
        _ => {}
    }
    l4
}
