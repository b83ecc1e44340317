//! 디바이스 모델 — 노출되는 스캐너의 설정, 능력, 잡 팩토리
//!
//! [`DeviceConfig`]는 네트워크에 노출되는 스캐너 한 대를 기술합니다.
//! 코어는 디바이스가 물리 장치인지 가상 장치인지 알지 못하며,
//! [`JobFactory`] 계약을 통해서만 잡을 생성합니다.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ScanpostError};
use crate::job::DynScanJob;

/// eSCL 프로토콜 버전 (ScannerCapabilities/ScannerStatus 공통)
pub const ESCL_VERSION: &str = "2.6";

/// eSCL `scan` XML 네임스페이스
pub const NS_SCAN: &str = "http://schemas.hp.com/imaging/escl/2011/05/03";

/// PWG `pwg` XML 네임스페이스
pub const NS_PWG: &str = "http://www.pwg.org/schemas/2010/12/sm";

// ─── 스캔 옵션 어휘 ──────────────────────────────────────────────────

/// 색상 모드
///
/// 와이어 표기는 eSCL ColorMode 문자열을 그대로 따릅니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    /// 1비트 흑백
    BlackAndWhite1,
    /// 8비트 그레이스케일
    Grayscale8,
    /// 24비트 컬러
    Rgb24,
}

impl ColorMode {
    /// eSCL 와이어 문자열을 반환합니다.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::BlackAndWhite1 => "BlackAndWhite1",
            Self::Grayscale8 => "Grayscale8",
            Self::Rgb24 => "RGB24",
        }
    }

    /// eSCL 와이어 문자열에서 파싱합니다.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "BlackAndWhite1" => Some(Self::BlackAndWhite1),
            "Grayscale8" | "Grayscale16" => Some(Self::Grayscale8),
            "RGB24" | "RGB48" => Some(Self::Rgb24),
            _ => None,
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// 입력 소스
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource {
    /// 평판
    Platen,
    /// 자동 급지 장치
    Feeder,
}

impl InputSource {
    /// eSCL 와이어 문자열을 반환합니다.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Platen => "Platen",
            Self::Feeder => "Feeder",
        }
    }

    /// eSCL 와이어 문자열에서 파싱합니다.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Platen" => Some(Self::Platen),
            "Feeder" | "ADF" => Some(Self::Feeder),
            _ => None,
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

// ─── ScannerCapabilities ─────────────────────────────────────────────

/// 디바이스가 광고하는 능력 기술자
///
/// 능력 조회 요청에 그대로 반환되며, 잡 생성 시 요청 옵션 검증의
/// 기준이 됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerCapabilities {
    /// 제조사/모델 문자열
    pub make_and_model: String,
    /// 일련번호
    pub serial_number: String,
    /// 디바이스 UUID
    pub uuid: String,
    /// 지원 해상도 (DPI)
    pub resolutions: Vec<u32>,
    /// 지원 색상 모드
    pub color_modes: Vec<ColorMode>,
    /// 지원 문서 형식 (MIME 타입)
    pub document_formats: Vec<String>,
    /// 지원 입력 소스
    pub input_sources: Vec<InputSource>,
    /// 양면 스캔 지원 여부
    pub duplex_supported: bool,
    /// 최대 스캔 폭 (1/300 인치)
    pub max_width: u32,
    /// 최대 스캔 높이 (1/300 인치)
    pub max_height: u32,
    /// 디바이스 아이콘 (PNG)
    #[serde(skip)]
    pub icon_png: Option<Bytes>,
}

impl Default for ScannerCapabilities {
    fn default() -> Self {
        Self {
            make_and_model: "Scanpost Virtual Scanner".to_owned(),
            serial_number: "00000000".to_owned(),
            uuid: String::new(),
            resolutions: vec![100, 150, 200, 300, 400, 600],
            color_modes: vec![
                ColorMode::BlackAndWhite1,
                ColorMode::Grayscale8,
                ColorMode::Rgb24,
            ],
            document_formats: vec![
                "application/pdf".to_owned(),
                "image/jpeg".to_owned(),
                "image/png".to_owned(),
            ],
            input_sources: vec![InputSource::Platen, InputSource::Feeder],
            duplex_supported: true,
            max_width: 2550,
            max_height: 4200,
            icon_png: None,
        }
    }
}

// ─── ScanSettings ────────────────────────────────────────────────────

/// 클라이언트가 요청한 스캔 옵션
///
/// POST /eSCL/ScanJobs 본문의 ScanSettings 문서를 파싱한 결과입니다.
/// 누락된 요소는 기본값으로 채워집니다.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    /// X축 해상도 (DPI)
    pub x_resolution: u32,
    /// Y축 해상도 (DPI)
    pub y_resolution: u32,
    /// 색상 모드
    pub color_mode: ColorMode,
    /// 입력 소스
    pub input_source: InputSource,
    /// 양면 스캔 여부
    pub duplex: bool,
    /// 요청 문서 형식 (MIME 타입)
    pub document_format: String,
    /// 스캔 영역 폭 (1/300 인치, 0 = 전체)
    pub width: u32,
    /// 스캔 영역 높이 (1/300 인치, 0 = 전체)
    pub height: u32,
    /// 스캔 영역 X 오프셋 (1/300 인치)
    pub x_offset: u32,
    /// 스캔 영역 Y 오프셋 (1/300 인치)
    pub y_offset: u32,
    /// 압축 계수 (0~100)
    pub compression_factor: Option<u32>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            x_resolution: 300,
            y_resolution: 300,
            color_mode: ColorMode::Rgb24,
            input_source: InputSource::Platen,
            duplex: false,
            document_format: "image/jpeg".to_owned(),
            width: 0,
            height: 0,
            x_offset: 0,
            y_offset: 0,
            compression_factor: None,
        }
    }
}

impl ScanSettings {
    /// 요청 옵션을 디바이스 능력과 대조하여 검증합니다.
    ///
    /// 지원하지 않는 옵션이 하나라도 있으면
    /// [`ConfigError::UnsupportedOption`]을 반환합니다. 검증은 잡 생성
    /// 이전에 수행되므로 실패한 요청은 `Processing`에 진입하지 않습니다.
    pub fn validate_against(&self, caps: &ScannerCapabilities) -> Result<(), ConfigError> {
        for (axis, dpi) in [("XResolution", self.x_resolution), ("YResolution", self.y_resolution)]
        {
            if !caps.resolutions.contains(&dpi) {
                return Err(ConfigError::UnsupportedOption {
                    option: axis.to_owned(),
                    value: dpi.to_string(),
                });
            }
        }
        if !caps.color_modes.contains(&self.color_mode) {
            return Err(ConfigError::UnsupportedOption {
                option: "ColorMode".to_owned(),
                value: self.color_mode.to_string(),
            });
        }
        if !caps.document_formats.contains(&self.document_format) {
            return Err(ConfigError::UnsupportedOption {
                option: "DocumentFormat".to_owned(),
                value: self.document_format.clone(),
            });
        }
        if !caps.input_sources.contains(&self.input_source) {
            return Err(ConfigError::UnsupportedOption {
                option: "InputSource".to_owned(),
                value: self.input_source.to_string(),
            });
        }
        if self.duplex && !caps.duplex_supported {
            return Err(ConfigError::UnsupportedOption {
                option: "Duplex".to_owned(),
                value: "true".to_owned(),
            });
        }
        Ok(())
    }
}

// ─── DeviceConfig ────────────────────────────────────────────────────

/// 잡 팩토리 계약
///
/// 요청 옵션을 받아 이미 시작된 잡을 반환합니다. 페이지가 실제로
/// 어떻게 생산되는지는 팩토리 구현의 책임입니다.
pub type JobFactory =
    Arc<dyn Fn(&ScanSettings) -> Result<Arc<dyn DynScanJob>, ScanpostError> + Send + Sync>;

/// 네트워크에 노출되는 스캐너 한 대의 설정
///
/// 소유권은 등록자에게 있으며, 레지스트리는 식별자로 키된 참조만
/// 보관합니다. 식별자는 서버 인스턴스 내에서 유일해야 합니다.
#[derive(Clone)]
pub struct DeviceConfig {
    /// 안정적인 디바이스 식별자 (서버 인스턴스 내 유일)
    pub id: String,
    /// 능력 기술자
    pub capabilities: ScannerCapabilities,
    /// 평문 HTTP 리스너 포트 (0 = 임시 포트)
    pub port: u16,
    /// TLS 리스너 포트 (0 = 임시 포트)
    pub tls_port: u16,
    /// 잡 팩토리
    pub factory: JobFactory,
}

impl DeviceConfig {
    /// 새 디바이스 설정을 생성합니다.
    pub fn new(id: impl Into<String>, capabilities: ScannerCapabilities, factory: JobFactory) -> Self {
        Self {
            id: id.into(),
            capabilities,
            port: 0,
            tls_port: 0,
            factory,
        }
    }

    /// 평문 리스너 포트를 지정합니다.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// TLS 리스너 포트를 지정합니다.
    pub fn with_tls_port(mut self, tls_port: u16) -> Self {
        self.tls_port = tls_port;
        self
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("port", &self.port)
            .field("tls_port", &self.tls_port)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_mode_wire_roundtrip() {
        assert_eq!(ColorMode::from_wire("RGB24"), Some(ColorMode::Rgb24));
        assert_eq!(ColorMode::Rgb24.as_wire(), "RGB24");
        assert_eq!(
            ColorMode::from_wire("Grayscale16"),
            Some(ColorMode::Grayscale8)
        );
        assert_eq!(ColorMode::from_wire("Sepia"), None);
    }

    #[test]
    fn input_source_wire_roundtrip() {
        assert_eq!(InputSource::from_wire("Platen"), Some(InputSource::Platen));
        assert_eq!(InputSource::from_wire("ADF"), Some(InputSource::Feeder));
        assert_eq!(InputSource::from_wire("Duplex"), None);
    }

    #[test]
    fn default_settings_pass_default_capabilities() {
        let caps = ScannerCapabilities::default();
        let settings = ScanSettings::default();
        assert!(settings.validate_against(&caps).is_ok());
    }

    #[test]
    fn unsupported_resolution_rejected() {
        let caps = ScannerCapabilities {
            resolutions: vec![200, 300],
            ..Default::default()
        };
        let settings = ScanSettings {
            x_resolution: 9999,
            y_resolution: 9999,
            ..Default::default()
        };
        let err = settings.validate_against(&caps).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedOption { .. }));
        assert!(err.to_string().contains("9999"));
    }

    #[test]
    fn unsupported_format_rejected() {
        let caps = ScannerCapabilities {
            document_formats: vec!["application/pdf".to_owned()],
            ..Default::default()
        };
        let settings = ScanSettings {
            document_format: "image/tiff".to_owned(),
            ..Default::default()
        };
        let err = settings.validate_against(&caps).unwrap_err();
        assert!(err.to_string().contains("image/tiff"));
    }

    #[test]
    fn duplex_rejected_when_unsupported() {
        let caps = ScannerCapabilities {
            duplex_supported: false,
            ..Default::default()
        };
        let settings = ScanSettings {
            input_source: InputSource::Feeder,
            duplex: true,
            ..Default::default()
        };
        assert!(settings.validate_against(&caps).is_err());
    }
}
