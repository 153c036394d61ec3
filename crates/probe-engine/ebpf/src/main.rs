#![no_std]
#![no_main]

use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::bindings::{BPF_NOEXIST, xdp_action};
use aya_ebpf::macros::{map, xdp};
use aya_ebpf::maps::{HashMap, LruHashMap};
use aya_ebpf::programs::XdpContext;
use network_types::{
    eth::{EthHdr, EtherType},
    ip::{IpProto, Ipv4Hdr},
    tcp::TcpHdr,
    udp::UdpHdr,
};

use flowtally_common::{
    DEFAULT_FIXED_ENTRIES, DEFAULT_LRU_ENTRIES, FlowKey, IPV4_MIN_HDR_LEN, KEY_SCOPE_DESTINATION,
    POLICY_FIXED,
};

// 로드 시점에 유저스페이스가 덮어쓰는 전역 변수
#[unsafe(no_mangle)]
static FILTER_ENABLED: u8 = 0;
#[unsafe(no_mangle)]
static FILTER_ADDR: u32 = 0;
#[unsafe(no_mangle)]
static KEY_SCOPE: u8 = 0;
#[unsafe(no_mangle)]
static POLICY: u8 = 0;

/// 가득 차면 커널이 LRU 엔트리를 축출
#[map(name = "FLOW_STATS_LRU")]
static FLOW_STATS_LRU: LruHashMap<FlowKey, u64> =
    LruHashMap::with_max_entries(DEFAULT_LRU_ENTRIES, 0);

/// 가득 차면 새 키 삽입이 실패
#[map(name = "FLOW_STATS_FIXED")]
static FLOW_STATS_FIXED: HashMap<FlowKey, u64> =
    HashMap::with_max_entries(DEFAULT_FIXED_ENTRIES, 0);

/// XDP 흐름 카운터
///
/// 모든 수신 프레임을 관측하고 항상 통과시킵니다.
#[xdp]
pub fn flowtally_xdp(ctx: XdpContext) -> u32 {
    let _ = try_flowtally_xdp(&ctx);
    xdp_action::XDP_PASS
}

/// 파싱 실패, 필터 불일치, 테이블 가득 참은 모두 `Err(())`로 끝나며
/// 맵을 변경하지 않습니다.
fn try_flowtally_xdp(ctx: &XdpContext) -> Result<(), ()> {
    let frame_len = (ctx.data_end() - ctx.data()) as u64;

    let eth_hdr: *const EthHdr = ptr_at(ctx, 0)?;
    if unsafe { (*eth_hdr).ether_type } != EtherType::Ipv4 as u16 {
        return Err(());
    }

    let ipv4_hdr: *const Ipv4Hdr = ptr_at(ctx, EthHdr::LEN)?;
    let vihl = unsafe { (*ipv4_hdr).vihl };
    if vihl >> 4 != 4 {
        return Err(());
    }
    let ip_hdr_len = usize::from(vihl & 0x0f) * 4;
    if ip_hdr_len < IPV4_MIN_HDR_LEN {
        return Err(());
    }
    // 옵션을 포함한 전체 IPv4 헤더가 프레임 안에 있어야 함
    check_len(ctx, EthHdr::LEN + ip_hdr_len)?;

    let proto = unsafe { (*ipv4_hdr).proto };
    let src_addr = u32::from_be_bytes(unsafe { (*ipv4_hdr).src_addr });
    let dst_addr = u32::from_be_bytes(unsafe { (*ipv4_hdr).dst_addr });

    if unsafe { ptr::read_volatile(&FILTER_ENABLED) } != 0
        && dst_addr != unsafe { ptr::read_volatile(&FILTER_ADDR) }
    {
        return Err(());
    }

    let l4 = EthHdr::LEN + ip_hdr_len;
    let (src_port, dst_port) = match proto {
        IpProto::Tcp => {
            let tcp_hdr: *const TcpHdr = ptr_at(ctx, l4)?;
            unsafe {
                (
                    u16::from_be_bytes((*tcp_hdr).source),
                    u16::from_be_bytes((*tcp_hdr).dest),
                )
            }
        }
        IpProto::Udp => {
            let udp_hdr: *const UdpHdr = ptr_at(ctx, l4)?;
            unsafe {
                (
                    u16::from_be_bytes((*udp_hdr).src),
                    u16::from_be_bytes((*udp_hdr).dst),
                )
            }
        }
        _ => (0, 0),
    };

    let key = if unsafe { ptr::read_volatile(&KEY_SCOPE) } == KEY_SCOPE_DESTINATION {
        FlowKey::destination(dst_addr)
    } else {
        FlowKey::new(src_addr, dst_addr, src_port, dst_port, proto as u8)
    };

    if unsafe { ptr::read_volatile(&POLICY) } == POLICY_FIXED {
        add_fixed(&key, frame_len)
    } else {
        add_lru(&key, frame_len)
    }
}

#[inline(always)]
fn check_len(ctx: &XdpContext, len: usize) -> Result<(), ()> {
    if ctx.data() + len > ctx.data_end() {
        return Err(());
    }
    Ok(())
}

#[inline(always)]
fn ptr_at<T>(ctx: &XdpContext, offset: usize) -> Result<*const T, ()> {
    check_len(ctx, offset + mem::size_of::<T>())?;
    Ok((ctx.data() + offset) as *const T)
}

#[inline(always)]
fn atomic_add(counter: *mut u64, bytes: u64) {
    // SAFETY: 맵 값 포인터는 8바이트 정렬이며 엔트리가 존재하는 동안 유효함
    unsafe { AtomicU64::from_ptr(counter) }.fetch_add(bytes, Ordering::Relaxed);
}

fn add_lru(key: &FlowKey, bytes: u64) -> Result<(), ()> {
    if let Some(counter) = FLOW_STATS_LRU.get_ptr_mut(key) {
        atomic_add(counter, bytes);
        return Ok(());
    }
    if FLOW_STATS_LRU.insert(key, &bytes, u64::from(BPF_NOEXIST)).is_ok() {
        return Ok(());
    }
    // 다른 CPU가 먼저 삽입함
    let counter = FLOW_STATS_LRU.get_ptr_mut(key).ok_or(())?;
    atomic_add(counter, bytes);
    Ok(())
}

fn add_fixed(key: &FlowKey, bytes: u64) -> Result<(), ()> {
    if let Some(counter) = FLOW_STATS_FIXED.get_ptr_mut(key) {
        atomic_add(counter, bytes);
        return Ok(());
    }
    if FLOW_STATS_FIXED.insert(key, &bytes, u64::from(BPF_NOEXIST)).is_ok() {
        return Ok(());
    }
    // 다른 CPU가 먼저 삽입했거나 맵이 가득 참
    let counter = FLOW_STATS_FIXED.get_ptr_mut(key).ok_or(())?;
    atomic_add(counter, bytes);
    Ok(())
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
