//! 커널 프로브: 컴파일된 XDP 오브젝트 로드/어태치 및 맵 스냅샷
//!
//! 커널 측 프로그램은 인메모리 [`Dispatcher`](crate::Dispatcher)와 같은 규칙으로
//! 헤더를 파싱하고 카운터를 갱신합니다. 로드 시점에 다음을 설정합니다.
//!
//! - 전역 변수: `FILTER_ENABLED`, `FILTER_ADDR`, `KEY_SCOPE`, `POLICY`
//! - 활성 맵의 `max_entries`: 설정된 테이블 용량
//!
//! 맵은 프로그램이 어태치된 동안에만 존재하며, [`KernelProbe::detach`] 또는
//! drop 시 함께 해제됩니다.
//!
//! # Linux 전용
//! 다른 플랫폼에서 `attach()`는 `ProbeError::Load`를 반환합니다.

use flowtally_common::FlowKey;
#[cfg(target_os = "linux")]
use flowtally_common::{
    GLOBAL_FILTER_ADDR, GLOBAL_FILTER_ENABLED, GLOBAL_KEY_SCOPE, GLOBAL_POLICY,
    MAP_FLOW_STATS_FIXED, MAP_FLOW_STATS_LRU, POLICY_EVICT, POLICY_FIXED, PROGRAM_NAME,
};
use flowtally_core::config::{ProbeConfig, TablePolicy};
use flowtally_core::error::{FlowtallyError, ProbeError};
#[cfg(target_os = "linux")]
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::SnapshotSource;

/// XDP 어태치 모드 문자열을 aya 플래그로 변환합니다.
#[cfg(target_os = "linux")]
fn xdp_flags(mode: &str) -> aya::programs::XdpFlags {
    use aya::programs::XdpFlags;
    match mode {
        "native" => XdpFlags::DRV_MODE,
        "hw" => XdpFlags::HW_MODE,
        _ => XdpFlags::SKB_MODE,
    }
}

/// 정책에 해당하는 커널 맵 이름
pub fn map_name(policy: TablePolicy) -> &'static str {
    match policy {
        TablePolicy::Evict => flowtally_common::MAP_FLOW_STATS_LRU,
        TablePolicy::Fixed => flowtally_common::MAP_FLOW_STATS_FIXED,
    }
}

/// locked memory 제한을 해제합니다. 5.11 미만 커널에서 맵 생성에 필요합니다.
#[cfg(target_os = "linux")]
fn raise_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    // SAFETY: 유효한 rlimit 구조체 포인터를 전달하며 전역 상태는 커널이 관리함
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!(ret, "remove limit on locked memory failed");
    }
}

/// 인터페이스에 어태치된 커널 프로브
pub struct KernelProbe {
    interface: String,
    config: EngineConfig,
    #[cfg(target_os = "linux")]
    bpf: aya::Ebpf,
    #[cfg(target_os = "linux")]
    link: Option<aya::programs::xdp::XdpLinkId>,
}

impl KernelProbe {
    /// XDP 오브젝트를 로드하고 인터페이스에 어태치합니다.
    ///
    /// # 에러
    /// - `ConfigError::InvalidValue`: 엔진 설정 검증 실패
    /// - `ProbeError::Load`: 오브젝트 로드 또는 프로그램 검증 실패
    /// - `ProbeError::Attach`: 인터페이스 어태치 실패
    #[cfg(target_os = "linux")]
    pub fn attach(probe: &ProbeConfig) -> Result<Self, FlowtallyError> {
        use aya::EbpfLoader;
        use aya::programs::Xdp;

        let config = EngineConfig::from_core(probe);
        config.validate()?;

        let filter_enabled = u8::from(config.filter_address.is_some());
        let filter_addr = config.filter_address.map(u32::from).unwrap_or(0);
        let key_scope = config.scope().as_raw();
        let policy = match config.policy {
            TablePolicy::Evict => POLICY_EVICT,
            TablePolicy::Fixed => POLICY_FIXED,
        };
        // validate()가 u32 범위를 보장함
        let max_entries = u32::try_from(config.capacity).unwrap_or(u32::MAX);

        raise_memlock_rlimit();

        let mut loader = EbpfLoader::new();
        loader
            .set_global(GLOBAL_FILTER_ENABLED, &filter_enabled, true)
            .set_global(GLOBAL_FILTER_ADDR, &filter_addr, true)
            .set_global(GLOBAL_KEY_SCOPE, &key_scope, true)
            .set_global(GLOBAL_POLICY, &policy, true)
            .set_max_entries(map_name(config.policy), max_entries);
        // 비활성 맵은 최소 크기로 만듦
        let idle_map = match config.policy {
            TablePolicy::Evict => MAP_FLOW_STATS_FIXED,
            TablePolicy::Fixed => MAP_FLOW_STATS_LRU,
        };
        loader.set_max_entries(idle_map, 1);

        let mut bpf = loader
            .load_file(&probe.object_path)
            .map_err(|e| ProbeError::Load(format!("{}: {e}", probe.object_path)))?;

        let program: &mut Xdp = bpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| ProbeError::Load(format!("program {PROGRAM_NAME} not found")))?
            .try_into()
            .map_err(|e| ProbeError::Load(format!("{PROGRAM_NAME} is not an xdp program: {e}")))?;
        program
            .load()
            .map_err(|e| ProbeError::Load(format!("verifier rejected {PROGRAM_NAME}: {e}")))?;
        let link = program
            .attach(&probe.interface, xdp_flags(&probe.xdp_mode))
            .map_err(|e| ProbeError::Attach(format!("{}: {e}", probe.interface)))?;

        info!(
            interface = probe.interface.as_str(),
            xdp_mode = probe.xdp_mode.as_str(),
            map = map_name(config.policy),
            capacity = max_entries,
            filter = ?config.filter_address,
            "xdp probe attached"
        );

        Ok(Self {
            interface: probe.interface.clone(),
            config,
            bpf,
            link: Some(link),
        })
    }

    /// XDP 오브젝트를 로드합니다 (비-Linux 스텁).
    #[cfg(not(target_os = "linux"))]
    pub fn attach(_probe: &ProbeConfig) -> Result<Self, FlowtallyError> {
        Err(ProbeError::Load("XDP is only supported on Linux".to_owned()).into())
    }

    /// 어태치된 인터페이스
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// 적용된 엔진 설정
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// XDP 프로그램을 디태치하고 맵을 해제합니다.
    ///
    /// # 에러
    /// - `ProbeError::NotAttached`: 이미 디태치된 경우
    /// - `ProbeError::Attach`: 커널 디태치 실패
    #[cfg(target_os = "linux")]
    pub fn detach(mut self) -> Result<(), FlowtallyError> {
        use aya::programs::Xdp;

        let link = self.link.take().ok_or(ProbeError::NotAttached)?;
        let program: &mut Xdp = self
            .bpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| ProbeError::Attach(format!("program {PROGRAM_NAME} not found")))?
            .try_into()
            .map_err(|e| ProbeError::Attach(format!("{e}")))?;
        program
            .detach(link)
            .map_err(|e| ProbeError::Attach(format!("detach from {}: {e}", self.interface)))?;

        info!(interface = self.interface.as_str(), "xdp probe detached");
        Ok(())
    }

    /// XDP 프로그램을 디태치합니다 (비-Linux 스텁).
    #[cfg(not(target_os = "linux"))]
    pub fn detach(self) -> Result<(), FlowtallyError> {
        Err(ProbeError::NotAttached.into())
    }
}

impl SnapshotSource for KernelProbe {
    #[cfg(target_os = "linux")]
    fn snapshot(&self) -> Result<Vec<(FlowKey, u64)>, ProbeError> {
        use aya::maps::{HashMap, MapData};

        let name = map_name(self.config.policy);
        let map = self
            .bpf
            .map(name)
            .ok_or_else(|| ProbeError::Map(format!("map {name} not found")))?;
        let table: HashMap<&MapData, FlowKey, u64> =
            HashMap::try_from(map).map_err(|e| ProbeError::Map(format!("{name}: {e}")))?;

        let mut entries = Vec::with_capacity(self.config.capacity.min(4096));
        for item in table.iter() {
            match item {
                Ok(entry) => entries.push(entry),
                // 순회 중 축출된 키는 건너뜀
                Err(e) => warn!(map = name, error = %e, "skipping unreadable map entry"),
            }
        }
        Ok(entries)
    }

    #[cfg(not(target_os = "linux"))]
    fn snapshot(&self) -> Result<Vec<(FlowKey, u64)>, ProbeError> {
        Err(ProbeError::NotAttached)
    }
}
