//! eSCL 와이어 문서 — 렌더링과 파싱
//!
//! 문서 구조는 클라이언트 상호운용성을 위해 고정된 계약입니다.
//! 요소 이름, 네임스페이스, 순서를 임의로 바꾸면 안 됩니다.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use scanpost_core::device::{
    ColorMode, ESCL_VERSION, InputSource, NS_PWG, NS_SCAN, ScanSettings, ScannerCapabilities,
};
use scanpost_core::error::ProtocolError;
use scanpost_core::event::JobState;
use scanpost_core::registry::JobSnapshot;

// ─── 렌더링 헬퍼 ─────────────────────────────────────────────────────

fn el(buf: &mut String, name: &str, text: &str) {
    buf.push('<');
    buf.push_str(name);
    buf.push('>');
    buf.push_str(&escape(text));
    buf.push_str("</");
    buf.push_str(name);
    buf.push('>');
}

fn open(buf: &mut String, name: &str) {
    buf.push('<');
    buf.push_str(name);
    buf.push('>');
}

fn close(buf: &mut String, name: &str) {
    buf.push_str("</");
    buf.push_str(name);
    buf.push('>');
}

fn doc_root(buf: &mut String, name: &str) {
    buf.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    buf.push('<');
    buf.push_str(name);
    buf.push_str(&format!(" xmlns:scan=\"{NS_SCAN}\" xmlns:pwg=\"{NS_PWG}\">"));
}

// ─── ScannerCapabilities ─────────────────────────────────────────────

/// ScannerCapabilities 문서를 렌더링합니다.
pub fn scanner_capabilities(caps: &ScannerCapabilities, protocol: &str, port: u16) -> String {
    let mut buf = String::with_capacity(2048);
    doc_root(&mut buf, "scan:ScannerCapabilities");

    el(&mut buf, "pwg:Version", ESCL_VERSION);
    el(&mut buf, "pwg:MakeAndModel", &caps.make_and_model);
    el(&mut buf, "pwg:SerialNumber", &caps.serial_number);
    el(&mut buf, "scan:UUID", &caps.uuid);
    el(&mut buf, "scan:AdminURI", "");
    let icon_uri = if caps.icon_png.is_some() {
        format!(
            "{protocol}://scanpost-{}.local.:{port}/eSCL/icon.png",
            caps.uuid
        )
    } else {
        String::new()
    };
    el(&mut buf, "scan:IconURI", &icon_uri);
    el(&mut buf, "scan:Naps2Extensions", "Progress;ErrorDetails;ShortTimeout");

    if caps.input_sources.contains(&InputSource::Platen) {
        open(&mut buf, "scan:Platen");
        open(&mut buf, "scan:PlatenInputCaps");
        input_caps(&mut buf, caps);
        close(&mut buf, "scan:PlatenInputCaps");
        close(&mut buf, "scan:Platen");
    }

    if caps.input_sources.contains(&InputSource::Feeder) {
        open(&mut buf, "scan:Adf");
        open(&mut buf, "scan:AdfSimplexInputCaps");
        input_caps(&mut buf, caps);
        close(&mut buf, "scan:AdfSimplexInputCaps");
        if caps.duplex_supported {
            open(&mut buf, "scan:AdfDuplexInputCaps");
            input_caps(&mut buf, caps);
            close(&mut buf, "scan:AdfDuplexInputCaps");
        }
        close(&mut buf, "scan:Adf");
    }

    open(&mut buf, "scan:CompressionFactorSupport");
    el(&mut buf, "scan:Min", "0");
    el(&mut buf, "scan:Max", "100");
    el(&mut buf, "scan:Normal", "75");
    el(&mut buf, "scan:Step", "1");
    close(&mut buf, "scan:CompressionFactorSupport");

    close(&mut buf, "scan:ScannerCapabilities");
    buf
}

fn input_caps(buf: &mut String, caps: &ScannerCapabilities) {
    el(buf, "scan:MinWidth", "1");
    el(buf, "scan:MaxWidth", &caps.max_width.to_string());
    el(buf, "scan:MinHeight", "1");
    el(buf, "scan:MaxHeight", &caps.max_height.to_string());
    el(buf, "scan:MaxScanRegions", "1");

    open(buf, "scan:SettingProfiles");
    open(buf, "scan:SettingProfile");

    open(buf, "scan:ColorModes");
    for mode in &caps.color_modes {
        el(buf, "scan:ColorMode", mode.as_wire());
    }
    close(buf, "scan:ColorModes");

    open(buf, "scan:DocumentFormats");
    for format in &caps.document_formats {
        el(buf, "pwg:DocumentFormat", format);
    }
    for format in &caps.document_formats {
        el(buf, "scan:DocumentFormatExt", format);
    }
    close(buf, "scan:DocumentFormats");

    open(buf, "scan:SupportedResolutions");
    open(buf, "scan:DiscreteResolutions");
    for dpi in &caps.resolutions {
        open(buf, "scan:DiscreteResolution");
        el(buf, "scan:XResolution", &dpi.to_string());
        el(buf, "scan:YResolution", &dpi.to_string());
        close(buf, "scan:DiscreteResolution");
    }
    close(buf, "scan:DiscreteResolutions");
    close(buf, "scan:SupportedResolutions");

    close(buf, "scan:SettingProfile");
    close(buf, "scan:SettingProfiles");
}

// ─── ScannerStatus ───────────────────────────────────────────────────

/// ScannerStatus 문서를 렌더링합니다.
///
/// 잡 목록은 호출자가 최근 활동 순으로 정렬해 전달합니다.
pub fn scanner_status(processing: bool, jobs: &[JobSnapshot]) -> String {
    let mut buf = String::with_capacity(1024);
    doc_root(&mut buf, "scan:ScannerStatus");

    el(&mut buf, "pwg:Version", ESCL_VERSION);
    el(&mut buf, "pwg:State", if processing { "Processing" } else { "Idle" });
    el(
        &mut buf,
        "scan:AdfState",
        if processing {
            "ScannerAdfProcessing"
        } else {
            "ScannedAdfLoaded"
        },
    );

    open(&mut buf, "scan:Jobs");
    for job in jobs {
        open(&mut buf, "scan:JobInfo");
        el(&mut buf, "pwg:JobUri", &format!("/eSCL/ScanJobs/{}", job.id));
        el(&mut buf, "pwg:JobUuid", &job.id);
        el(&mut buf, "scan:Age", &job.age_secs.to_string());
        el(
            &mut buf,
            "pwg:ImagesCompleted",
            &job.images_completed.to_string(),
        );
        el(
            &mut buf,
            "pwg:ImagesToTransfer",
            &job.images_to_transfer.to_string(),
        );
        el(&mut buf, "pwg:JobState", job.state.wire_name());
        open(&mut buf, "pwg:JobStateReasons");
        el(
            &mut buf,
            "pwg:JobStateReason",
            if job.state == JobState::Processing {
                "JobScanning"
            } else {
                "JobCompletedSuccessfully"
            },
        );
        close(&mut buf, "pwg:JobStateReasons");
        close(&mut buf, "scan:JobInfo");
    }
    close(&mut buf, "scan:Jobs");

    close(&mut buf, "scan:ScannerStatus");
    buf
}

// ─── ScanSettings 파싱 ───────────────────────────────────────────────

/// POST /eSCL/ScanJobs 본문의 ScanSettings 문서를 파싱합니다.
///
/// 알 수 없는 요소는 무시하고 누락된 요소는 기본값으로 채웁니다.
/// 형식이 잘못된 문서는 [`ProtocolError::MalformedSettings`]입니다.
pub fn parse_scan_settings(body: &str) -> Result<ScanSettings, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::MalformedSettings {
        reason: reason.to_owned(),
    };

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut settings = ScanSettings::default();
    let mut root_seen = false;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if !root_seen {
                    if name != "ScanSettings" {
                        return Err(malformed(&format!("unexpected root element '{name}'")));
                    }
                    root_seen = true;
                } else {
                    current = Some(name);
                }
            }
            Ok(Event::Text(t)) => {
                let Some(name) = current.as_deref() else {
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|e| malformed(&format!("bad text content: {e}")))?;
                let text = text.trim();
                apply_setting(&mut settings, name, text)?;
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(&format!("xml error: {e}"))),
        }
    }

    if !root_seen {
        return Err(malformed("empty document"));
    }
    Ok(settings)
}

fn apply_setting(
    settings: &mut ScanSettings,
    name: &str,
    text: &str,
) -> Result<(), ProtocolError> {
    let malformed = |reason: String| ProtocolError::MalformedSettings { reason };
    let parse_u32 = |field: &str, text: &str| {
        text.parse::<u32>()
            .map_err(|_| malformed(format!("invalid {field}: '{text}'")))
    };

    match name {
        "XResolution" => settings.x_resolution = parse_u32(name, text)?,
        "YResolution" => settings.y_resolution = parse_u32(name, text)?,
        "Width" => settings.width = parse_u32(name, text)?,
        "Height" => settings.height = parse_u32(name, text)?,
        "XOffset" => settings.x_offset = parse_u32(name, text)?,
        "YOffset" => settings.y_offset = parse_u32(name, text)?,
        "CompressionFactor" => settings.compression_factor = Some(parse_u32(name, text)?),
        "ColorMode" => {
            settings.color_mode = ColorMode::from_wire(text)
                .ok_or_else(|| malformed(format!("unknown color mode '{text}'")))?;
        }
        "InputSource" => {
            settings.input_source = InputSource::from_wire(text)
                .ok_or_else(|| malformed(format!("unknown input source '{text}'")))?;
        }
        "Duplex" => {
            settings.duplex = text
                .parse::<bool>()
                .map_err(|_| malformed(format!("invalid duplex flag '{text}'")))?;
        }
        "DocumentFormat" | "DocumentFormatExt" => {
            settings.document_format = text.to_owned();
        }
        // Intent, ContentRegionUnits, MustHonor 등은 무시한다
        _ => {}
    }
    Ok(())
}
