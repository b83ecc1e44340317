//! 디스커버리 광고 레코드
//!
//! `start()`에 성공한 서버는 리스너마다 [`ServiceAdvertisement`]를
//! 노출합니다. 외부 광고 컴포넌트(mDNS/DNS-SD)가 이 레코드를 읽어
//! 네트워크에 송출합니다. 송출 자체는 이 크레이트의 책임이 아닙니다.
//!
//! TXT 키는 eSCL 서비스 로케이터가 읽는 키 집합을 그대로 따릅니다.

use scanpost_core::device::{ColorMode, DeviceConfig, InputSource};

/// 평문 eSCL 서비스 타입
pub const SERVICE_TYPE_HTTP: &str = "_uscan._tcp";

/// TLS eSCL 서비스 타입
pub const SERVICE_TYPE_HTTPS: &str = "_uscans._tcp";

/// 리스너 하나에 대한 디스커버리 광고 레코드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAdvertisement {
    /// 디바이스 식별자
    pub device_id: String,
    /// 서비스 인스턴스 이름
    pub service_name: String,
    /// 서비스 타입 (`_uscan._tcp` 또는 `_uscans._tcp`)
    pub service_type: &'static str,
    /// 실제 바인드된 포트
    pub port: u16,
    /// TXT 레코드 키-값 쌍
    pub txt: Vec<(String, String)>,
}

impl ServiceAdvertisement {
    /// 디바이스와 바인드 결과로부터 광고 레코드를 만듭니다.
    pub fn for_device(device: &DeviceConfig, port: u16, tls: bool) -> Self {
        let caps = &device.capabilities;

        let color_values: Vec<&str> = caps
            .color_modes
            .iter()
            .map(|mode| match mode {
                ColorMode::BlackAndWhite1 => "binary",
                ColorMode::Grayscale8 => "grayscale",
                ColorMode::Rgb24 => "color",
            })
            .collect();
        let source_values: Vec<&str> = caps
            .input_sources
            .iter()
            .map(|source| match source {
                InputSource::Platen => "platen",
                InputSource::Feeder => "adf",
            })
            .collect();

        let txt = vec![
            ("txtvers".to_owned(), "1".to_owned()),
            ("Vers".to_owned(), "2.6".to_owned()),
            ("ty".to_owned(), caps.make_and_model.clone()),
            ("rs".to_owned(), "eSCL".to_owned()),
            ("pdl".to_owned(), caps.document_formats.join(",")),
            ("cs".to_owned(), color_values.join(",")),
            ("is".to_owned(), source_values.join(",")),
            (
                "duplex".to_owned(),
                if caps.duplex_supported { "T" } else { "F" }.to_owned(),
            ),
            ("uuid".to_owned(), caps.uuid.clone()),
            ("adminurl".to_owned(), String::new()),
            ("note".to_owned(), String::new()),
        ];

        Self {
            device_id: device.id.clone(),
            service_name: caps.make_and_model.clone(),
            service_type: if tls {
                SERVICE_TYPE_HTTPS
            } else {
                SERVICE_TYPE_HTTP
            },
            port,
            txt,
        }
    }

    /// TXT 값을 키로 조회합니다.
    pub fn txt_value(&self, key: &str) -> Option<&str> {
        self.txt
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
