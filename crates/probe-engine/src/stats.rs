//! 통계 수집: 테이블 스냅샷 기반 흐름 리포트
//!
//! [`FlowStats`]는 주기적으로 읽은 테이블 스냅샷을 [`FlowReport`]로 변환합니다.
//! 수집기는 테이블을 읽기만 하며 초기화하거나 엔트리를 지우지 않습니다.
//!
//! # 데이터 흐름
//! ```text
//! SnapshotSource ──snapshot──▶ Vec<(FlowKey, u64)> ──update──▶ FlowReport
//!                                                  (이전 스냅샷과 delta → rate)
//! ```

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::time::Instant;

use serde::Serialize;

use flowtally_common::FlowKey;
use flowtally_core::config::TablePolicy;
use flowtally_core::metrics as m;

use crate::flow::{dst_ip, src_ip};

/// IP 프로토콜 번호를 사람이 읽을 수 있는 이름으로 변환합니다.
pub fn protocol_name(protocol: u8) -> Cow<'static, str> {
    match protocol {
        1 => Cow::Borrowed("ICMP"),
        2 => Cow::Borrowed("IGMP"),
        6 => Cow::Borrowed("TCP"),
        17 => Cow::Borrowed("UDP"),
        47 => Cow::Borrowed("GRE"),
        50 => Cow::Borrowed("ESP"),
        51 => Cow::Borrowed("AH"),
        112 => Cow::Borrowed("VRRP"),
        other => Cow::Owned(format!("Unknown ({other})")),
    }
}

/// 리포트의 흐름 한 행
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRow {
    /// 출발지 주소
    pub src_addr: Ipv4Addr,
    /// 목적지 주소
    pub dst_addr: Ipv4Addr,
    /// 출발지 포트
    pub src_port: u16,
    /// 목적지 포트
    pub dst_port: u16,
    /// 프로토콜 이름
    pub protocol: String,
    /// 누적 바이트
    pub bytes: u64,
    /// 직전 스냅샷 대비 초당 바이트
    pub bytes_per_sec: f64,
}

/// 한 번의 수집 결과
///
/// 행은 누적 바이트 내림차순으로 정렬됩니다.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowReport {
    /// 흐름 행
    pub rows: Vec<FlowRow>,
    /// 테이블 엔트리 수
    pub entries: usize,
    /// 테이블 최대 용량
    pub capacity: usize,
    /// 전체 누적 바이트
    pub total_bytes: u64,
    /// 전체 초당 바이트
    pub total_bytes_per_sec: f64,
}

/// 흐름 통계 수집기
///
/// # Rate 계산
/// `update()`마다 직전 스냅샷과 같은 키의 차이를 경과 시간으로 나눕니다.
/// 축출 후 다시 생긴 키처럼 카운터가 줄어든 경우 현재 값을 delta로 봅니다.
/// 첫 번째 호출에서는 rate가 0입니다.
#[derive(Debug, Clone)]
pub struct FlowStats {
    capacity: usize,
    policy: TablePolicy,
    prev: HashMap<FlowKey, u64>,
    last_poll: Option<Instant>,
}

impl FlowStats {
    /// 테이블 용량/정책을 받아 수집기를 생성합니다.
    pub fn new(capacity: usize, policy: TablePolicy) -> Self {
        Self {
            capacity,
            policy,
            prev: HashMap::new(),
            last_poll: None,
        }
    }

    /// 현재 시각 기준으로 스냅샷을 반영합니다.
    pub fn update(&mut self, snapshot: Vec<(FlowKey, u64)>) -> FlowReport {
        self.update_at(snapshot, Instant::now())
    }

    /// 지정한 시각 기준으로 스냅샷을 반영합니다.
    pub fn update_at(&mut self, snapshot: Vec<(FlowKey, u64)>, now: Instant) -> FlowReport {
        let elapsed = self
            .last_poll
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .filter(|secs| *secs > 0.0);

        let mut rows = Vec::with_capacity(snapshot.len());
        let mut total_bytes = 0u64;
        let mut total_rate = 0.0;
        for (key, bytes) in &snapshot {
            let rate = match (elapsed, self.prev.get(key)) {
                (Some(secs), Some(prev)) => Self::compute_rate(*bytes, *prev, secs),
                _ => 0.0,
            };
            total_bytes = total_bytes.saturating_add(*bytes);
            total_rate += rate;
            rows.push(FlowRow {
                src_addr: src_ip(key),
                dst_addr: dst_ip(key),
                src_port: key.src_port,
                dst_port: key.dst_port,
                protocol: protocol_name(key.protocol).into_owned(),
                bytes: *bytes,
                bytes_per_sec: rate,
            });
        }
        rows.sort_by(|a, b| b.bytes.cmp(&a.bytes));

        let report = FlowReport {
            entries: snapshot.len(),
            capacity: self.capacity,
            total_bytes,
            total_bytes_per_sec: total_rate,
            rows,
        };
        self.record_metrics(&report);

        self.prev = snapshot.into_iter().collect();
        self.last_poll = Some(now);
        report
    }

    /// 수집 상태를 초기화합니다. 테이블에는 영향이 없습니다.
    pub fn reset(&mut self) {
        self.prev.clear();
        self.last_poll = None;
    }

    fn compute_rate(current: u64, prev: u64, elapsed_secs: f64) -> f64 {
        let delta = if current >= prev { current - prev } else { current };
        // u64 → f64: 주기당 delta는 실용적으로 2^53 미만
        #[allow(clippy::cast_precision_loss)]
        {
            delta as f64 / elapsed_secs
        }
    }

    fn record_metrics(&self, report: &FlowReport) {
        #[allow(clippy::cast_precision_loss)]
        {
            metrics::gauge!(m::TABLE_ENTRIES).set(report.entries as f64);
            metrics::gauge!(m::TABLE_CAPACITY, m::LABEL_POLICY => self.policy.as_str())
                .set(report.capacity as f64);
        }
        metrics::counter!(m::SNAPSHOTS_TOTAL).increment(1);

        let mut by_protocol: BTreeMap<&str, (u64, f64)> = BTreeMap::new();
        for row in &report.rows {
            let entry = by_protocol.entry(row.protocol.as_str()).or_default();
            entry.0 = entry.0.saturating_add(row.bytes);
            entry.1 += row.bytes_per_sec;
        }
        for (protocol, (bytes, rate)) in by_protocol {
            let protocol = protocol.to_owned();
            #[allow(clippy::cast_precision_loss)]
            let bytes = bytes as f64;
            metrics::gauge!(m::TABLE_BYTES, m::LABEL_PROTOCOL => protocol.clone()).set(bytes);
            metrics::gauge!(m::BYTES_PER_SECOND, m::LABEL_PROTOCOL => protocol).set(rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtally_common::{PROTO_ICMP, PROTO_TCP, PROTO_UDP};
    use std::time::Duration;

    fn tcp_key(src: [u8; 4], sport: u16) -> FlowKey {
        FlowKey::new(u32::from_be_bytes(src), 0x0A00_0002, sport, 80, PROTO_TCP)
    }

    // =============================================================================
    // protocol_name 테스트
    // =============================================================================

    #[test]
    fn test_protocol_names() {
        assert_eq!(protocol_name(PROTO_ICMP), "ICMP");
        assert_eq!(protocol_name(PROTO_TCP), "TCP");
        assert_eq!(protocol_name(PROTO_UDP), "UDP");
        assert_eq!(protocol_name(47), "GRE");
        assert_eq!(protocol_name(112), "VRRP");
        assert_eq!(protocol_name(253), "Unknown (253)");
    }

    // =============================================================================
    // update 테스트
    // =============================================================================

    #[test]
    fn test_first_update_has_zero_rate() {
        let mut stats = FlowStats::new(16, TablePolicy::Evict);
        let report = stats.update(vec![(tcp_key([10, 0, 0, 1], 1234), 74)]);

        assert_eq!(report.entries, 1);
        assert_eq!(report.capacity, 16);
        assert_eq!(report.total_bytes, 74);
        assert_eq!(report.rows[0].bytes_per_sec, 0.0);
        assert_eq!(report.rows[0].src_addr, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(report.rows[0].protocol, "TCP");
    }

    #[test]
    fn test_rows_sorted_by_bytes_descending() {
        let mut stats = FlowStats::new(16, TablePolicy::Evict);
        let report = stats.update(vec![
            (tcp_key([10, 0, 0, 1], 1), 100),
            (tcp_key([10, 0, 0, 2], 2), 900),
            (tcp_key([10, 0, 0, 3], 3), 500),
        ]);

        let bytes: Vec<u64> = report.rows.iter().map(|r| r.bytes).collect();
        assert_eq!(bytes, vec![900, 500, 100]);
    }

    #[test]
    fn test_second_update_computes_rate_from_delta() {
        let mut stats = FlowStats::new(16, TablePolicy::Evict);
        let key = tcp_key([10, 0, 0, 1], 1234);
        let t0 = Instant::now();

        stats.update_at(vec![(key, 1_000)], t0);
        let report = stats.update_at(vec![(key, 3_000)], t0 + Duration::from_secs(2));

        assert!((report.rows[0].bytes_per_sec - 1_000.0).abs() < f64::EPSILON);
        assert!((report.total_bytes_per_sec - 1_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_restarted_counter_uses_current_value() {
        let mut stats = FlowStats::new(1, TablePolicy::Evict);
        let key = tcp_key([10, 0, 0, 1], 1234);
        let t0 = Instant::now();

        stats.update_at(vec![(key, 5_000)], t0);
        let report = stats.update_at(vec![(key, 60)], t0 + Duration::from_secs(1));

        assert!((report.rows[0].bytes_per_sec - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_new_key_has_zero_rate() {
        let mut stats = FlowStats::new(16, TablePolicy::Fixed);
        let t0 = Instant::now();
        stats.update_at(vec![(tcp_key([10, 0, 0, 1], 1), 10)], t0);
        let report = stats.update_at(
            vec![(tcp_key([10, 0, 0, 9], 9), 10)],
            t0 + Duration::from_secs(1),
        );
        assert_eq!(report.rows[0].bytes_per_sec, 0.0);
    }

    #[test]
    fn test_reset_forgets_previous_snapshot() {
        let mut stats = FlowStats::new(16, TablePolicy::Evict);
        let key = tcp_key([10, 0, 0, 1], 1234);
        let t0 = Instant::now();
        stats.update_at(vec![(key, 10)], t0);
        stats.reset();

        let report = stats.update_at(vec![(key, 20)], t0 + Duration::from_secs(1));
        assert_eq!(report.rows[0].bytes_per_sec, 0.0);
    }

    #[test]
    fn test_report_serializes_addresses_as_strings() {
        let mut stats = FlowStats::new(16, TablePolicy::Evict);
        let report = stats.update(vec![(tcp_key([192, 168, 1, 10], 443), 1)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rows"][0]["src_addr"], "192.168.1.10");
        assert_eq!(json["rows"][0]["dst_addr"], "10.0.0.2");
    }

    #[test]
    fn test_update_records_table_metrics() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            let mut stats = FlowStats::new(16, TablePolicy::Evict);
            let udp = FlowKey::new(0x0A00_0001, 0x0A00_0002, 53, 53, PROTO_UDP);
            stats.update(vec![(tcp_key([10, 0, 0, 1], 1234), 1500), (udp, 74)]);
        });

        let rendered = handle.render();
        assert!(rendered.contains("flowtally_snapshots_total 1"), "{rendered}");
        assert!(rendered.contains("flowtally_table_entries"));
        assert!(rendered.contains(r#"flowtally_table_capacity{policy="evict"}"#));
        assert!(rendered.contains(r#"flowtally_table_bytes{protocol="TCP"}"#));
        assert!(rendered.contains(r#"flowtally_table_bytes{protocol="UDP"}"#));
        assert!(rendered.contains(r#"flowtally_bytes_per_second{protocol="TCP"}"#));
    }
}
