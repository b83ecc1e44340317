//! 에러 타입 — 도메인별 에러 정의

/// Scanpost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ScanpostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 디바이스 관련 에러
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// 스캔 잡 에러
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// 페이지 파이프라인 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 프로토콜 에러 (잘못된 클라이언트 요청)
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 네트워크 전송 에러
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

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

    /// 이미 등록된 디바이스 식별자
    #[error("device already registered: {id}")]
    DuplicateDevice { id: String },

    /// TLS 정책이 요구하는 인증서가 설정되지 않음
    #[error("security policy requires TLS but no certificate is configured for device '{device}'")]
    MissingCertificate { device: String },

    /// 디바이스가 지원하지 않는 스캔 옵션
    #[error("unsupported {option}: {value}")]
    UnsupportedOption { option: String, value: String },
}

/// 디바이스 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// 등록되지 않은 디바이스
    #[error("device not found: {id}")]
    NotFound { id: String },

    /// 이미 비종료 잡이 진행 중인 디바이스
    #[error("device busy: {id} already has an active job")]
    Busy { id: String },
}

/// 스캔 잡 에러
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// 페이지 생산 중 발생한 에러 — 원인을 항상 포함합니다
    #[error("job failed: {cause}")]
    Failed { cause: String },

    /// 명시적 취소로 종료된 잡 (실패와 구분됨)
    #[error("job canceled")]
    Canceled,

    /// 생산자 태스크 패닉
    #[error("page producer panicked")]
    ProducerPanicked,

    /// 현재 상태에서 허용되지 않는 호출
    #[error("invalid call in state '{state}': {reason}")]
    InvalidState { state: String, reason: String },
}

/// 페이지 파이프라인 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 채널 수신 실패
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}

/// 프로토콜 에러 — 잘못된 클라이언트 요청
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// ScanSettings 문서 파싱 실패
    #[error("malformed scan settings: {reason}")]
    MalformedSettings { reason: String },

    /// 존재하지 않는 잡에 대한 요청
    #[error("unknown job: {id}")]
    UnknownJob { id: String },
}

/// 네트워크 전송 에러
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 리스너 바인딩 실패
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// TLS 설정/핸드셰이크 실패
    #[error("tls error: {0}")]
    Tls(String),

    /// 응답 본문 쓰기 실패
    #[error("response write failed: {0}")]
    Write(String),
}
