#![no_main]

use flowtally_probe::flowtally_common::{ETH_HDR_LEN, IPV4_MIN_HDR_LEN};
use flowtally_probe::parse_headers;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if parse_headers(data).is_ok() {
        // 성공했다면 최소 Ethernet + IPv4 헤더가 버퍼 안에 있었어야 함
        assert!(data.len() >= ETH_HDR_LEN + IPV4_MIN_HDR_LEN);
        assert_eq!(data[ETH_HDR_LEN] >> 4, 4);
    }
});
