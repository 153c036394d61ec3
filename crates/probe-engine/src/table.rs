//! 카운터 테이블: 용량이 제한된 동시성 바이트 카운터
//!
//! [`BoundedCounterMap`] trait과 두 구현을 제공합니다.
//!
//! - [`LruCounterTable`]: 가득 차면 가장 오래 접근되지 않은 엔트리를 축출
//! - [`FixedCounterTable`]: 가득 차면 새 키 삽입을 거부 (기존 키는 계속 갱신)
//!
//! # 동시성
//! ```text
//! update(key)
//!   ├─ read lock ── 키 존재 ── fetch_add + touch ── 완료
//!   └─ write lock ─ 키 재확인 ─ 삽입 / 축출 후 삽입 / 거부
//! ```
//! 기존 키 갱신은 읽기 락만 잡고 엔트리별 `AtomicU64`로 더하므로
//! 같은 키에 대한 동시 갱신이 유실되지 않습니다. 용량 계산은 항상
//! 쓰기 락 아래에서 수행됩니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use flowtally_common::FlowKey;
use flowtally_core::config::TablePolicy;

/// 단일 갱신 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// 기존 엔트리에 더함
    Updated,
    /// 새 엔트리 생성
    Inserted,
    /// LRU 엔트리를 축출하고 새 엔트리 생성
    Evicted(FlowKey),
    /// 용량 초과로 관측값 폐기 (고정 정책)
    Rejected,
}

/// 용량이 제한된 동시성 카운터 맵
///
/// `update`는 실패를 드러내지 않습니다. 결과는 정보용입니다.
pub trait BoundedCounterMap: Send + Sync + fmt::Debug {
    /// `key`의 카운터에 `bytes`를 더하거나 새 엔트리를 만듭니다.
    fn update(&self, key: FlowKey, bytes: u64) -> UpdateOutcome;

    /// 단일 키의 현재 카운터
    fn get(&self, key: &FlowKey) -> Option<u64>;

    /// 읽기 전용 내보내기
    ///
    /// 엔트리별 읽기는 원자적이지만 전체 집합이 한 시점의 일관된
    /// 상태임을 보장하지는 않습니다.
    fn snapshot(&self) -> Vec<(FlowKey, u64)>;

    /// 현재 엔트리 수
    fn len(&self) -> usize;

    /// 엔트리가 없는지 여부
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 최대 엔트리 수
    fn capacity(&self) -> usize;

    /// 용량 정책
    fn policy(&self) -> TablePolicy;
}

/// 정책에 맞는 테이블을 생성합니다.
///
/// `capacity`가 0이면 1로 올립니다.
pub fn counter_table(policy: TablePolicy, capacity: usize) -> Arc<dyn BoundedCounterMap> {
    match policy {
        TablePolicy::Evict => Arc::new(LruCounterTable::new(capacity)),
        TablePolicy::Fixed => Arc::new(FixedCounterTable::new(capacity)),
    }
}

// =============================================================================
// 공통 저장소
// =============================================================================

#[derive(Debug)]
struct CounterSlot {
    bytes: AtomicU64,
    last_access: AtomicU64,
}

impl CounterSlot {
    fn new(bytes: u64, now: u64) -> Self {
        Self {
            bytes: AtomicU64::new(bytes),
            last_access: AtomicU64::new(now),
        }
    }

    fn add(&self, bytes: u64, now: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.last_access.fetch_max(now, Ordering::Relaxed);
    }

    fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct SlotMap {
    slots: RwLock<HashMap<FlowKey, CounterSlot>>,
    capacity: usize,
    /// 접근 순서를 매기는 논리 시계
    clock: AtomicU64,
}

impl SlotMap {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: RwLock::new(HashMap::with_capacity(capacity)),
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    // 락 보유 중 패닉이 나도 카운터는 원자값이라 구조가 깨지지 않음
    fn read(&self) -> RwLockReadGuard<'_, HashMap<FlowKey, CounterSlot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<FlowKey, CounterSlot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 기존 키면 읽기 락만으로 더하고 `true`를 반환합니다.
    fn add_existing(&self, key: &FlowKey, bytes: u64) -> bool {
        match self.read().get(key) {
            Some(slot) => {
                slot.add(bytes, self.tick());
                true
            }
            None => false,
        }
    }

    fn get(&self, key: &FlowKey) -> Option<u64> {
        self.read().get(key).map(CounterSlot::bytes)
    }

    fn snapshot(&self) -> Vec<(FlowKey, u64)> {
        self.read()
            .iter()
            .map(|(key, slot)| (*key, slot.bytes()))
            .collect()
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}

// =============================================================================
// LRU 축출 테이블
// =============================================================================

/// 가득 차면 최근에 가장 덜 접근된 엔트리를 축출하는 테이블
///
/// 축출 후보 탐색은 최대 `capacity`개 엔트리만 순회합니다.
#[derive(Debug)]
pub struct LruCounterTable {
    inner: SlotMap,
}

impl LruCounterTable {
    /// 지정한 용량의 테이블을 생성합니다.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: SlotMap::new(capacity),
        }
    }
}

impl BoundedCounterMap for LruCounterTable {
    fn update(&self, key: FlowKey, bytes: u64) -> UpdateOutcome {
        if self.inner.add_existing(&key, bytes) {
            return UpdateOutcome::Updated;
        }

        let mut slots = self.inner.write();
        // 읽기 락을 놓은 사이 다른 컨텍스트가 삽입했을 수 있음
        if let Some(slot) = slots.get(&key) {
            slot.add(bytes, self.inner.tick());
            return UpdateOutcome::Updated;
        }

        let mut evicted = None;
        if slots.len() >= self.inner.capacity {
            let victim = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_access())
                .map(|(victim, _)| *victim);
            if let Some(victim) = victim {
                slots.remove(&victim);
                evicted = Some(victim);
            }
        }

        slots.insert(key, CounterSlot::new(bytes, self.inner.tick()));
        match evicted {
            Some(victim) => UpdateOutcome::Evicted(victim),
            None => UpdateOutcome::Inserted,
        }
    }

    fn get(&self, key: &FlowKey) -> Option<u64> {
        self.inner.get(key)
    }

    fn snapshot(&self) -> Vec<(FlowKey, u64)> {
        self.inner.snapshot()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn policy(&self) -> TablePolicy {
        TablePolicy::Evict
    }
}

// =============================================================================
// 고정 용량 테이블
// =============================================================================

/// 가득 차면 새 키를 거부하는 테이블
#[derive(Debug)]
pub struct FixedCounterTable {
    inner: SlotMap,
}

impl FixedCounterTable {
    /// 지정한 용량의 테이블을 생성합니다.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: SlotMap::new(capacity),
        }
    }
}

impl BoundedCounterMap for FixedCounterTable {
    fn update(&self, key: FlowKey, bytes: u64) -> UpdateOutcome {
        if self.inner.add_existing(&key, bytes) {
            return UpdateOutcome::Updated;
        }

        let mut slots = self.inner.write();
        if let Some(slot) = slots.get(&key) {
            slot.add(bytes, self.inner.tick());
            return UpdateOutcome::Updated;
        }
        if slots.len() >= self.inner.capacity {
            return UpdateOutcome::Rejected;
        }

        slots.insert(key, CounterSlot::new(bytes, self.inner.tick()));
        UpdateOutcome::Inserted
    }

    fn get(&self, key: &FlowKey) -> Option<u64> {
        self.inner.get(key)
    }

    fn snapshot(&self) -> Vec<(FlowKey, u64)> {
        self.inner.snapshot()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn policy(&self) -> TablePolicy {
        TablePolicy::Fixed
    }
}
