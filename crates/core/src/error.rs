//! 에러 타입: 도메인별 에러 정의
//!
//! 패킷 단위 처리 경로(파싱, 테이블 갱신)의 실패는 여기에 속하지 않습니다.
//! 그런 실패는 probe 크레이트 안에서 "변경 없음 + 통과"로 흡수되며,
//! 이 모듈의 에러는 설정 로딩과 어태치 라이프사이클에서만 발생합니다.

/// flowtally 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum FlowtallyError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 프로브 라이프사이클 에러
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 프로브 어태치/디태치 및 맵 접근 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// 이미 어태치된 상태에서 다시 어태치를 시도
    #[error("probe is already attached")]
    AlreadyAttached,

    /// 어태치되지 않은 상태에서 테이블 접근 또는 디태치 시도
    #[error("probe is not attached")]
    NotAttached,

    /// XDP 오브젝트 로드 실패
    #[error("xdp object load failed: {0}")]
    Load(String),

    /// 인터페이스 어태치 실패
    #[error("attach to interface failed: {0}")]
    Attach(String),

    /// 커널 맵 접근 실패
    #[error("map error: {0}")]
    Map(String),
}
