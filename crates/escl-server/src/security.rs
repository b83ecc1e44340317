//! 보안 정책과 TLS 인증서 로딩
//!
//! [`SecurityPolicy`]는 서버가 평문 HTTP, TLS, 혹은 둘 다를 받아들일지
//! 결정합니다. 인증서 신원은 외부에서 공급되며(PEM 파일), 서버 시작
//! 전에만 설정할 수 있고 실행 중에는 읽기 전용입니다.

use std::fmt;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::EsclServerError;

/// 리스너 보안 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityPolicy {
    /// 평문 HTTP만 허용
    PlaintextOnly,
    /// TLS만 허용
    TlsOnly,
    /// 평문과 TLS 리스너를 한 쌍으로 연다
    Both,
}

impl SecurityPolicy {
    /// 설정 문자열에서 파싱합니다.
    pub fn parse(value: &str) -> Result<Self, EsclServerError> {
        match value {
            "plaintext" => Ok(Self::PlaintextOnly),
            "tls" => Ok(Self::TlsOnly),
            "both" => Ok(Self::Both),
            other => Err(EsclServerError::Config {
                field: "security_policy".to_owned(),
                reason: format!("unknown policy '{other}'"),
            }),
        }
    }

    /// 평문 리스너를 열어야 하는지 반환합니다.
    pub fn allows_plaintext(self) -> bool {
        matches!(self, Self::PlaintextOnly | Self::Both)
    }

    /// TLS 리스너를 열어야 하는지 반환합니다.
    pub fn allows_tls(self) -> bool {
        matches!(self, Self::TlsOnly | Self::Both)
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlaintextOnly => write!(f, "plaintext"),
            Self::TlsOnly => write!(f, "tls"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// PEM 인증서/키를 검증하고 리스너용 TLS 설정을 만듭니다.
///
/// 체인과 키를 먼저 직접 파싱해 파일 단위의 구체적인 에러를 만들고,
/// 문제가 없으면 `axum-server`의 설정으로 변환합니다.
pub async fn load_rustls_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<RustlsConfig, EsclServerError> {
    load_certificates(cert_path).await?;
    load_private_key(key_path).await?;

    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| EsclServerError::CertificateParseFailed(e.to_string()))
}

/// PEM 파일에서 인증서 체인을 로드합니다.
pub async fn load_certificates(
    path: &Path,
) -> Result<Vec<CertificateDer<'static>>, EsclServerError> {
    if !path.exists() {
        return Err(EsclServerError::CertificateNotFound(path.to_path_buf()));
    }

    let pem_data = tokio::fs::read(path).await?;
    let mut reader = std::io::BufReader::new(&pem_data[..]);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EsclServerError::CertificateParseFailed(e.to_string()))?;

    if certs.is_empty() {
        return Err(EsclServerError::CertificateParseFailed(
            "no certificates found in file".to_owned(),
        ));
    }

    Ok(certs)
}

/// PEM 파일에서 개인 키를 로드합니다.
///
/// PKCS#8을 먼저 시도하고, 없으면 RSA 형식을 시도합니다.
pub async fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, EsclServerError> {
    if !path.exists() {
        return Err(EsclServerError::PrivateKeyNotFound(path.to_path_buf()));
    }

    let pem_data = tokio::fs::read(path).await?;

    let mut reader = std::io::BufReader::new(&pem_data[..]);
    let keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EsclServerError::PrivateKeyParseFailed(e.to_string()))?;
    if !keys.is_empty() {
        if keys.len() > 1 {
            return Err(EsclServerError::MultiplePrivateKeysFound);
        }
        return Ok(PrivateKeyDer::from(keys.into_iter().next().unwrap()));
    }

    let mut reader = std::io::BufReader::new(&pem_data[..]);
    let keys = rustls_pemfile::rsa_private_keys(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EsclServerError::PrivateKeyParseFailed(e.to_string()))?;
    if keys.is_empty() {
        return Err(EsclServerError::NoPrivateKeysFound);
    }
    if keys.len() > 1 {
        return Err(EsclServerError::MultiplePrivateKeysFound);
    }
    Ok(PrivateKeyDer::from(keys.into_iter().next().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parse_roundtrip() {
        assert_eq!(
            SecurityPolicy::parse("plaintext").unwrap(),
            SecurityPolicy::PlaintextOnly
        );
        assert_eq!(SecurityPolicy::parse("tls").unwrap(), SecurityPolicy::TlsOnly);
        assert_eq!(SecurityPolicy::parse("both").unwrap(), SecurityPolicy::Both);
        assert!(SecurityPolicy::parse("ssl").is_err());
    }

    #[test]
    fn policy_listener_selection() {
        assert!(SecurityPolicy::PlaintextOnly.allows_plaintext());
        assert!(!SecurityPolicy::PlaintextOnly.allows_tls());
        assert!(!SecurityPolicy::TlsOnly.allows_plaintext());
        assert!(SecurityPolicy::TlsOnly.allows_tls());
        assert!(SecurityPolicy::Both.allows_plaintext());
        assert!(SecurityPolicy::Both.allows_tls());
    }

    #[tokio::test]
    async fn missing_certificate_file_reported() {
        let result = load_certificates(Path::new("/nonexistent/cert.pem")).await;
        assert!(matches!(
            result,
            Err(EsclServerError::CertificateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_key_file_reported() {
        let result = load_private_key(Path::new("/nonexistent/key.pem")).await;
        assert!(matches!(result, Err(EsclServerError::PrivateKeyNotFound(_))));
    }

    #[tokio::test]
    async fn garbage_pem_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.pem");
        tokio::fs::write(&path, "not a certificate").await.unwrap();

        let result = load_certificates(&path).await;
        assert!(matches!(
            result,
            Err(EsclServerError::CertificateParseFailed(_))
        ));
    }
}
