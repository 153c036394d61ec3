//! 설정 관리: flowtally.toml 파싱 및 런타임 설정
//!
//! [`FlowtallyConfig`]는 모든 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`FLOWTALLY_PROBE_INTERFACE=eth0` 형식)
//! 3. 설정 파일 (`flowtally.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), flowtally_core::error::FlowtallyError> {
//! use flowtally_core::config::FlowtallyConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = FlowtallyConfig::load("flowtally.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = FlowtallyConfig::parse("[probe]\nmode = \"address\"\nfilter_address = \"185.79.97.55\"")?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FlowtallyError};

/// flow 모드의 기본 테이블 용량
pub const DEFAULT_FLOW_CAPACITY: usize = 16;
/// address 모드의 기본 테이블 용량
pub const DEFAULT_ADDRESS_CAPACITY: usize = 1024;

/// flowtally 통합 설정
///
/// `flowtally.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowtallyConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 프로브 설정
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl FlowtallyConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowtallyError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowtallyError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FlowtallyError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FlowtallyError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FlowtallyError> {
        toml::from_str(toml_str).map_err(|e| {
            FlowtallyError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `FLOWTALLY_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.log_level, "FLOWTALLY_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FLOWTALLY_GENERAL_LOG_FORMAT");

        override_string(&mut self.probe.interface, "FLOWTALLY_PROBE_INTERFACE");
        override_string(&mut self.probe.xdp_mode, "FLOWTALLY_PROBE_XDP_MODE");
        override_string(&mut self.probe.object_path, "FLOWTALLY_PROBE_OBJECT_PATH");
        override_parsed(&mut self.probe.mode, "FLOWTALLY_PROBE_MODE");
        override_optional(&mut self.probe.capacity, "FLOWTALLY_PROBE_CAPACITY");
        override_optional(&mut self.probe.policy, "FLOWTALLY_PROBE_POLICY");
        override_optional(
            &mut self.probe.filter_address,
            "FLOWTALLY_PROBE_FILTER_ADDRESS",
        );
        override_parsed(
            &mut self.probe.poll_interval_secs,
            "FLOWTALLY_PROBE_POLL_INTERVAL_SECS",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FlowtallyError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.probe.validate()
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> FlowtallyError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 키 구성 모드
///
/// 두 가지 구성은 동일한 파싱/테이블 로직을 공유하며 키 범위와
/// 기본 테이블 정책만 다릅니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// 5-tuple 흐름 추적 (기본: 용량 16, LRU 축출)
    #[default]
    Flow,
    /// 단일 목적지 주소 추적 (기본: 용량 1024, 고정 테이블)
    Address,
}

impl ProbeMode {
    /// 설정 문자열 표현
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::Address => "address",
        }
    }

    /// 모드별 기본 테이블 용량
    pub fn default_capacity(&self) -> usize {
        match self {
            Self::Flow => DEFAULT_FLOW_CAPACITY,
            Self::Address => DEFAULT_ADDRESS_CAPACITY,
        }
    }

    /// 모드별 기본 테이블 정책
    pub fn default_policy(&self) -> TablePolicy {
        match self {
            Self::Flow => TablePolicy::Evict,
            Self::Address => TablePolicy::Fixed,
        }
    }
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flow" => Ok(Self::Flow),
            "address" => Ok(Self::Address),
            other => Err(format!("unknown probe mode '{other}'")),
        }
    }
}

/// 카운터 테이블 용량 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TablePolicy {
    /// 가득 차면 가장 오래 접근되지 않은 엔트리를 축출
    Evict,
    /// 가득 차면 새 키의 관측을 버림
    Fixed,
}

impl TablePolicy {
    /// 설정 문자열 표현
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evict => "evict",
            Self::Fixed => "fixed",
        }
    }
}

impl fmt::Display for TablePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TablePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evict" => Ok(Self::Evict),
            "fixed" => Ok(Self::Fixed),
            other => Err(format!("unknown table policy '{other}'")),
        }
    }
}

/// 프로브 설정
///
/// `capacity`와 `policy`를 생략하면 `mode`의 기본값을 따릅니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// 감시할 네트워크 인터페이스
    pub interface: String,
    /// XDP 모드 (native, skb, hw)
    pub xdp_mode: String,
    /// 컴파일된 XDP 오브젝트 경로
    pub object_path: String,
    /// 키 구성 모드
    pub mode: ProbeMode,
    /// 테이블 최대 엔트리 수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// 테이블 용량 정책
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<TablePolicy>,
    /// 목적지 주소 필터 (address 모드에서 필수)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_address: Option<Ipv4Addr>,
    /// 테이블 스냅샷 주기 (초)
    pub poll_interval_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_owned(),
            xdp_mode: "skb".to_owned(),
            object_path: "/usr/lib/flowtally/flowtally-ebpf".to_owned(),
            mode: ProbeMode::Flow,
            capacity: None,
            policy: None,
            filter_address: None,
            poll_interval_secs: 1,
        }
    }
}

impl ProbeConfig {
    /// 실제로 적용될 테이블 용량
    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or_else(|| self.mode.default_capacity())
    }

    /// 실제로 적용될 테이블 정책
    pub fn effective_policy(&self) -> TablePolicy {
        self.policy.unwrap_or_else(|| self.mode.default_policy())
    }

    fn validate(&self) -> Result<(), FlowtallyError> {
        let valid_modes = ["native", "skb", "hw"];
        if !valid_modes.contains(&self.xdp_mode.as_str()) {
            return Err(invalid(
                "probe.xdp_mode",
                format!("must be one of: {}", valid_modes.join(", ")),
            ));
        }

        if self.interface.is_empty() {
            return Err(invalid("probe.interface", "interface must not be empty"));
        }

        // 커널 맵의 max_entries는 u32
        if let Some(capacity) = self.capacity {
            if capacity == 0 || u32::try_from(capacity).is_err() {
                return Err(invalid(
                    "probe.capacity",
                    format!("must be between 1 and {}", u32::MAX),
                ));
            }
        }

        if self.mode == ProbeMode::Address && self.filter_address.is_none() {
            return Err(invalid(
                "probe.filter_address",
                "address mode requires a filter_address",
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err(invalid(
                "probe.poll_interval_secs",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T>(target: &mut T, env_key: &str)
where
    T: FromStr,
{
    if let Ok(val) = std::env::var(env_key) {
        match val.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_optional<T>(target: &mut Option<T>, env_key: &str)
where
    T: FromStr,
{
    if let Ok(val) = std::env::var(env_key) {
        match val.trim().parse::<T>() {
            Ok(parsed) => *target = Some(parsed),
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse env var, ignoring"
            ),
        }
    }
}
