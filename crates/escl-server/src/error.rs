//! eSCL 서버 에러 타입

use std::path::PathBuf;

use scanpost_core::error::{ConfigError, ScanpostError, TransportError};

/// eSCL 서버 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum EsclServerError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 인증서 파일을 찾을 수 없음
    #[error("certificate file not found: {0}")]
    CertificateNotFound(PathBuf),

    /// 개인 키 파일을 찾을 수 없음
    #[error("private key file not found: {0}")]
    PrivateKeyNotFound(PathBuf),

    /// 인증서 파싱 실패
    #[error("failed to parse certificate: {0}")]
    CertificateParseFailed(String),

    /// 개인 키 파싱 실패
    #[error("failed to parse private key: {0}")]
    PrivateKeyParseFailed(String),

    /// 키 파일에 개인 키가 없음
    #[error("no private keys found in file")]
    NoPrivateKeysFound,

    /// 키 파일에 개인 키가 여러 개 있음
    #[error("multiple private keys found, expected one")]
    MultiplePrivateKeysFound,

    /// 리스너 바인딩 실패
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// 바인드 대상 주소
        addr: String,
        /// 실패 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EsclServerError> for ScanpostError {
    fn from(err: EsclServerError) -> Self {
        match err {
            EsclServerError::Config { field, reason } => {
                ScanpostError::Config(ConfigError::InvalidValue { field, reason })
            }
            EsclServerError::Bind { addr, reason } => {
                ScanpostError::Transport(TransportError::Bind { addr, reason })
            }
            other => ScanpostError::Transport(TransportError::Tls(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_maps_to_transport() {
        let err = EsclServerError::Bind {
            addr: "0.0.0.0:443".to_owned(),
            reason: "permission denied".to_owned(),
        };
        let scanpost_err: ScanpostError = err.into();
        assert!(matches!(
            scanpost_err,
            ScanpostError::Transport(TransportError::Bind { .. })
        ));
    }

    #[test]
    fn certificate_error_display() {
        let err = EsclServerError::CertificateNotFound(PathBuf::from("/etc/certs/cert.pem"));
        assert!(err.to_string().contains("cert.pem"));
    }
}
