//! 설정 관리 — scanpost.toml 파싱 및 런타임 설정
//!
//! [`ScanpostConfig`]는 모든 구성요소의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SCANPOST_SERVER_SECURITY_POLICY=tls` 형식)
//! 3. 설정 파일 (`scanpost.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), scanpost_core::error::ScanpostError> {
//! use scanpost_core::config::ScanpostConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ScanpostConfig::load("scanpost.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ScanpostConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ScanpostError};

/// Scanpost 통합 설정
///
/// `scanpost.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 구성요소는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanpostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 프로토콜 서버 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 페이지 파이프라인 설정
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// 레지스트리 설정
    #[serde(default)]
    pub registry: RegistryConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 노출할 디바이스 목록
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceSection>,
}

impl ScanpostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ScanpostError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ScanpostError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanpostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ScanpostError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ScanpostError> {
        toml::from_str(toml_str).map_err(|e| {
            ScanpostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `SCANPOST_{SECTION}_{FIELD}`
    /// 예: `SCANPOST_SERVER_SECURITY_POLICY=tls`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SCANPOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SCANPOST_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "SCANPOST_GENERAL_PID_FILE");

        // Server
        override_string(&mut self.server.host, "SCANPOST_SERVER_HOST");
        override_string(
            &mut self.server.security_policy,
            "SCANPOST_SERVER_SECURITY_POLICY",
        );
        override_string(&mut self.server.cert_path, "SCANPOST_SERVER_CERT_PATH");
        override_string(&mut self.server.key_path, "SCANPOST_SERVER_KEY_PATH");
        override_u64(
            &mut self.server.next_document_wait_secs,
            "SCANPOST_SERVER_NEXT_DOCUMENT_WAIT_SECS",
        );
        override_u64(
            &mut self.server.shutdown_timeout_secs,
            "SCANPOST_SERVER_SHUTDOWN_TIMEOUT_SECS",
        );

        // Pipeline
        override_usize(
            &mut self.pipeline.page_buffer_capacity,
            "SCANPOST_PIPELINE_PAGE_BUFFER_CAPACITY",
        );

        // Registry
        override_u64(
            &mut self.registry.job_retention_secs,
            "SCANPOST_REGISTRY_JOB_RETENTION_SECS",
        );
        override_u64(
            &mut self.registry.job_idle_timeout_secs,
            "SCANPOST_REGISTRY_JOB_IDLE_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.registry.purge_interval_secs,
            "SCANPOST_REGISTRY_PURGE_INTERVAL_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "SCANPOST_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "SCANPOST_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "SCANPOST_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ScanpostError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        // security_policy 검증
        let valid_policies = ["plaintext", "tls", "both"];
        if !valid_policies.contains(&self.server.security_policy.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "server.security_policy".to_owned(),
                reason: format!("must be one of: {}", valid_policies.join(", ")),
            }
            .into());
        }

        // TLS 정책이면 인증서 경로가 필요하다
        if self.server.security_policy != "plaintext"
            && (self.server.cert_path.is_empty() || self.server.key_path.is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "server.cert_path".to_owned(),
                reason: "cert_path and key_path are required when TLS is enabled".to_owned(),
            }
            .into());
        }

        if self.pipeline.page_buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.page_buffer_capacity".to_owned(),
                reason: "must be greater than zero".to_owned(),
            }
            .into());
        }

        // 디바이스 이름 중복/공백 검증
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "device.name".to_owned(),
                    reason: "device name must not be empty".to_owned(),
                }
                .into());
            }
            if !seen.insert(device.name.as_str()) {
                return Err(ConfigError::DuplicateDevice {
                    id: device.name.clone(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열 = 사용 안 함)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// 프로토콜 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 리스너 바인드 호스트
    pub host: String,
    /// 보안 정책 (plaintext, tls, both)
    pub security_policy: String,
    /// TLS 인증서 경로 (PEM)
    pub cert_path: String,
    /// TLS 개인 키 경로 (PEM)
    pub key_path: String,
    /// NextDocument에서 문서를 기다리는 최대 시간 (초) — 초과 시 503
    pub next_document_wait_secs: u64,
    /// 종료 시 잡 취소가 정착하기를 기다리는 최대 시간 (초)
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            security_policy: "plaintext".to_owned(),
            cert_path: String::new(),
            key_path: String::new(),
            next_document_wait_secs: 1,
            shutdown_timeout_secs: 5,
        }
    }
}

/// 페이지 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 싱크가 버퍼링하는 최대 페이지 수
    pub page_buffer_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_buffer_capacity: 4,
        }
    }
}

/// 레지스트리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 종료 잡을 상태 조회용으로 유지하는 유예 기간 (초)
    pub job_retention_secs: u64,
    /// 비종료 잡의 유휴 시간 제한 (초) — 초과 시 취소
    pub job_idle_timeout_secs: u64,
    /// 만료 잡 정리 주기 (초)
    pub purge_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            job_retention_secs: 30,
            job_idle_timeout_secs: 120,
            purge_interval_secs: 10,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 메트릭 리스너 주소
    pub listen_addr: String,
    /// 메트릭 리스너 포트
    pub port: u16,
    /// 스크레이프 엔드포인트
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9310,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// 노출할 디바이스 한 대의 설정 (`[[device]]` 섹션)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// 디바이스 식별자 (서버 인스턴스 내 유일)
    pub name: String,
    /// 제조사/모델 문자열
    pub make_and_model: String,
    /// 평문 리스너 포트 (0 = 임시 포트)
    pub port: u16,
    /// TLS 리스너 포트 (0 = 임시 포트)
    pub tls_port: u16,
    /// 가상 스캐너가 페이지로 제공할 파일 디렉토리
    pub source_dir: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            make_and_model: "Scanpost Virtual Scanner".to_owned(),
            port: 0,
            tls_port: 0,
            source_dir: String::new(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ScanpostConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.page_buffer_capacity, 4);
        assert_eq!(config.server.next_document_wait_secs, 1);
    }

    #[test]
    fn parse_minimal_toml() {
        let config = ScanpostConfig::parse("[general]\nlog_level = \"debug\"").unwrap();
        assert_eq!(config.general.log_level, "debug");
        // 나머지는 기본값
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.server.security_policy, "plaintext");
    }

    #[test]
    fn parse_device_sections() {
        let toml = r#"
            [[device]]
            name = "scanner-1"
            port = 8080
            source_dir = "/srv/pages"

            [[device]]
            name = "scanner-2"
        "#;
        let config = ScanpostConfig::parse(toml).unwrap();
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].name, "scanner-1");
        assert_eq!(config.devices[0].port, 8080);
        assert_eq!(config.devices[1].port, 0);
    }

    #[test]
    fn invalid_log_level_rejected() {
        let config = ScanpostConfig::parse("[general]\nlog_level = \"verbose\"").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn invalid_security_policy_rejected() {
        let config = ScanpostConfig::parse("[server]\nsecurity_policy = \"ssl\"").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("security_policy"));
    }

    #[test]
    fn tls_policy_requires_certificate_paths() {
        let config = ScanpostConfig::parse("[server]\nsecurity_policy = \"tls\"").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cert_path"));

        let config = ScanpostConfig::parse(
            "[server]\nsecurity_policy = \"tls\"\ncert_path = \"c.pem\"\nkey_path = \"k.pem\"",
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_buffer_capacity_rejected() {
        let config = ScanpostConfig::parse("[pipeline]\npage_buffer_capacity = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_device_names_rejected() {
        let toml = r#"
            [[device]]
            name = "scanner-1"

            [[device]]
            name = "scanner-1"
        "#;
        let config = ScanpostConfig::parse(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ScanpostError::Config(ConfigError::DuplicateDevice { .. })
        ));
    }

    #[test]
    fn malformed_toml_reports_parse_error() {
        let err = ScanpostConfig::parse("general = [").unwrap_err();
        assert!(matches!(
            err,
            ScanpostError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    #[serial]
    fn env_override_applies() {
        unsafe {
            std::env::set_var("SCANPOST_SERVER_SECURITY_POLICY", "both");
            std::env::set_var("SCANPOST_PIPELINE_PAGE_BUFFER_CAPACITY", "16");
        }
        let mut config = ScanpostConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.server.security_policy, "both");
        assert_eq!(config.pipeline.page_buffer_capacity, 16);
        unsafe {
            std::env::remove_var("SCANPOST_SERVER_SECURITY_POLICY");
            std::env::remove_var("SCANPOST_PIPELINE_PAGE_BUFFER_CAPACITY");
        }
    }

    #[test]
    #[serial]
    fn env_override_ignores_unparsable_values() {
        unsafe {
            std::env::set_var("SCANPOST_PIPELINE_PAGE_BUFFER_CAPACITY", "lots");
        }
        let mut config = ScanpostConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.pipeline.page_buffer_capacity, 4);
        unsafe {
            std::env::remove_var("SCANPOST_PIPELINE_PAGE_BUFFER_CAPACITY");
        }
    }

    #[tokio::test]
    async fn from_file_reports_missing_file() {
        let err = ScanpostConfig::from_file("/nonexistent/scanpost.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScanpostError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn from_file_loads_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanpost.toml");
        tokio::fs::write(&path, "[general]\nlog_level = \"warn\"")
            .await
            .unwrap();

        let config = ScanpostConfig::from_file(&path).await.unwrap();
        assert_eq!(config.general.log_level, "warn");
    }
}
