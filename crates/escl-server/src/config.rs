//! eSCL 서버 설정 (core 설정 확장)

use std::path::PathBuf;
use std::time::Duration;

use crate::error::EsclServerError;
use crate::security::SecurityPolicy;

/// eSCL 서버 설정
///
/// 서버 생성 시점에 전달되며 실행 중에는 변경되지 않습니다.
#[derive(Debug, Clone)]
pub struct EsclServerConfig {
    /// 리스너 바인드 호스트
    pub host: String,
    /// 보안 정책
    pub security_policy: SecurityPolicy,
    /// TLS 인증서 경로 (PEM)
    pub cert_path: Option<PathBuf>,
    /// TLS 개인 키 경로 (PEM)
    pub key_path: Option<PathBuf>,
    /// NextDocument에서 문서를 기다리는 최대 시간 — 초과 시 503
    pub next_document_wait: Duration,
    /// 503 응답의 Retry-After 헤더 값 (초)
    pub retry_after_secs: u64,
    /// 종료 시 잡 취소가 정착하기를 기다리는 최대 시간
    pub shutdown_timeout: Duration,
}

impl Default for EsclServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            security_policy: SecurityPolicy::PlaintextOnly,
            cert_path: None,
            key_path: None,
            next_document_wait: Duration::from_secs(1),
            retry_after_secs: 2,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl EsclServerConfig {
    /// core 설정 섹션에서 서버 설정을 만듭니다.
    pub fn from_core(
        core: &scanpost_core::config::ServerConfig,
    ) -> Result<Self, EsclServerError> {
        let security_policy = SecurityPolicy::parse(&core.security_policy)?;
        let path_or_none = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(PathBuf::from(s))
            }
        };
        let config = Self {
            host: core.host.clone(),
            security_policy,
            cert_path: path_or_none(&core.cert_path),
            key_path: path_or_none(&core.key_path),
            next_document_wait: Duration::from_secs(core.next_document_wait_secs),
            retry_after_secs: 2,
            shutdown_timeout: Duration::from_secs(core.shutdown_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// TLS를 여는 정책인데 인증서가 없으면 에러입니다. 인증서 파일
    /// 자체의 검증은 리스너 시작 시점에 수행됩니다.
    pub fn validate(&self) -> Result<(), EsclServerError> {
        if self.security_policy.allows_tls()
            && (self.cert_path.is_none() || self.key_path.is_none())
        {
            return Err(EsclServerError::Config {
                field: "cert_path".to_owned(),
                reason: format!(
                    "security policy '{}' requires cert_path and key_path",
                    self.security_policy
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EsclServerConfig::default().validate().is_ok());
    }

    #[test]
    fn tls_without_certificate_rejected() {
        let config = EsclServerConfig {
            security_policy: SecurityPolicy::TlsOnly,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cert_path"));
    }

    #[test]
    fn from_core_parses_policy_and_paths() {
        let core = scanpost_core::config::ServerConfig {
            security_policy: "both".to_owned(),
            cert_path: "/etc/scanpost/cert.pem".to_owned(),
            key_path: "/etc/scanpost/key.pem".to_owned(),
            next_document_wait_secs: 3,
            ..Default::default()
        };
        let config = EsclServerConfig::from_core(&core).unwrap();
        assert_eq!(config.security_policy, SecurityPolicy::Both);
        assert_eq!(config.next_document_wait, Duration::from_secs(3));
        assert!(config.cert_path.is_some());
    }

    #[test]
    fn from_core_rejects_unknown_policy() {
        let core = scanpost_core::config::ServerConfig {
            security_policy: "ssl".to_owned(),
            ..Default::default()
        };
        assert!(EsclServerConfig::from_core(&core).is_err());
    }
}
