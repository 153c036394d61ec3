//! 메트릭 상수
//!
//! 모든 메트릭 이름을 중앙에서 정의합니다. 메트릭은 테이블 스냅샷을 읽는
//! 수집기에서만 기록하며, 패킷 단위 경로는 메트릭을 기록하지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `flowtally_`
//! - 접미어: `_total` (counter), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 프로토콜 레이블 키 (tcp, udp, icmp, ...)
pub const LABEL_PROTOCOL: &str = "protocol";

/// 테이블 정책 레이블 키 (evict, fixed)
pub const LABEL_POLICY: &str = "policy";

// ─── 테이블 메트릭 ─────────────────────────────────────────────────

/// 현재 테이블 엔트리 수 (gauge)
pub const TABLE_ENTRIES: &str = "flowtally_table_entries";

/// 테이블 최대 용량 (gauge, label: policy)
pub const TABLE_CAPACITY: &str = "flowtally_table_capacity";

/// 수집된 스냅샷 수 (counter)
pub const SNAPSHOTS_TOTAL: &str = "flowtally_snapshots_total";

// ─── 트래픽 메트릭 ─────────────────────────────────────────────────

/// 스냅샷 기준 프로토콜별 테이블 바이트 합계 (gauge, label: protocol)
///
/// 축출된 엔트리의 바이트는 합계에서 빠지므로 counter가 아닌 gauge입니다.
pub const TABLE_BYTES: &str = "flowtally_table_bytes";

/// 프로토콜별 초당 바이트 (gauge, label: protocol)
pub const BYTES_PER_SECOND: &str = "flowtally_bytes_per_second";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다. 레코더가 없으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_gauge!(TABLE_ENTRIES, "Number of entries currently in the flow table");
    describe_gauge!(TABLE_CAPACITY, "Maximum number of entries in the flow table");
    describe_counter!(SNAPSHOTS_TOTAL, "Number of table snapshots collected");
    describe_gauge!(
        TABLE_BYTES,
        "Bytes held by live table entries, grouped by protocol"
    );
    describe_gauge!(
        BYTES_PER_SECOND,
        "Observed byte rate between snapshots, grouped by protocol"
    );
}
