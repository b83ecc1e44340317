//! eSCL 라우트 — 프로토콜 요청을 레지스트리/잡 연산으로 변환
//!
//! 경로와 상태 코드는 고정된 와이어 계약입니다:
//!
//! | 메서드 | 경로 | 동작 |
//! |---|---|---|
//! | GET | /eSCL/ScannerCapabilities | 능력 문서 |
//! | GET | /eSCL/ScannerStatus | 스캐너/잡 상태 문서 |
//! | GET | /eSCL/icon.png | 디바이스 아이콘 |
//! | POST | /eSCL/ScanJobs | 잡 생성 (201 + Location, busy면 503) |
//! | DELETE | /eSCL/ScanJobs/{id} | 잡 취소 (없거나 종료면 404) |
//! | GET | /eSCL/ScanJobs/{id}/ScanImageInfo | 스텁 |
//! | GET | /eSCL/ScanJobs/{id}/Progress | 줄 단위 진행률 (청크 응답) |
//! | GET | /eSCL/ScanJobs/{id}/ErrorDetails | 에러 스냅샷 문서 |
//! | GET | /eSCL/ScanJobs/{id}/NextDocument | 다음 문서 (대기 초과 503, 소진 404) |

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

use scanpost_core::error::{ConfigError, DeviceError, ScanpostError};
use scanpost_core::event::JobState;
use scanpost_core::job::DynScanJob;
use scanpost_core::metrics as m;
use scanpost_core::registry::{DeviceRegistry, JobHandle};

use crate::config::EsclServerConfig;
use crate::xml;

/// 리스너 하나에 바인딩되는 핸들러 상태
#[derive(Clone)]
pub(crate) struct DeviceState {
    pub registry: Arc<DeviceRegistry>,
    pub device_id: String,
    pub config: Arc<EsclServerConfig>,
    /// TLS 리스너 여부 (아이콘 URI 프로토콜 결정)
    pub tls: bool,
    /// 실제 바인드된 포트
    pub port: u16,
}

/// 디바이스 하나의 eSCL 라우터를 만듭니다.
pub(crate) fn router(state: DeviceState) -> Router {
    Router::new()
        .route("/eSCL/ScannerCapabilities", get(get_capabilities))
        .route("/eSCL/ScannerStatus", get(get_status))
        .route("/eSCL/icon.png", get(get_icon))
        .route("/eSCL/ScanJobs", post(create_job))
        .route("/eSCL/ScanJobs/{job_id}", delete(cancel_job))
        .route("/eSCL/ScanJobs/{job_id}/ScanImageInfo", get(get_image_info))
        .route("/eSCL/ScanJobs/{job_id}/Progress", get(get_progress))
        .route("/eSCL/ScanJobs/{job_id}/ErrorDetails", get(get_error_details))
        .route("/eSCL/ScanJobs/{job_id}/NextDocument", get(next_document))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn xml_response(doc: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], doc).into_response()
}

async fn get_capabilities(State(state): State<DeviceState>) -> Response {
    let Some(caps) = state.registry.capabilities(&state.device_id) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let protocol = if state.tls { "https" } else { "http" };
    xml_response(xml::scanner_capabilities(&caps, protocol, state.port))
}

async fn get_status(State(state): State<DeviceState>) -> Response {
    let processing = state.registry.is_processing(&state.device_id);
    let jobs = state.registry.jobs_snapshot(&state.device_id);
    xml_response(xml::scanner_status(processing, &jobs))
}

async fn get_icon(State(state): State<DeviceState>) -> Response {
    match state
        .registry
        .capabilities(&state.device_id)
        .and_then(|caps| caps.icon_png)
    {
        Some(icon) => ([(header::CONTENT_TYPE, "image/png")], icon).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn create_job(State(state): State<DeviceState>, body: String) -> Response {
    let settings = match xml::parse_scan_settings(&body) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::debug!(device = %state.device_id, error = %err, "rejecting malformed scan settings");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match state.registry.create_job_for(&state.device_id, &settings) {
        Ok(handle) => (
            StatusCode::CREATED,
            [(header::LOCATION, format!("/eSCL/ScanJobs/{}", handle.id))],
        )
            .into_response(),
        Err(ScanpostError::Device(DeviceError::Busy { .. })) => {
            tracing::debug!(device = %state.device_id, "job creation rejected, device busy");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        Err(ScanpostError::Config(err @ ConfigError::UnsupportedOption { .. })) => {
            tracing::debug!(device = %state.device_id, error = %err, "unsupported scan option");
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        Err(err) => {
            tracing::error!(device = %state.device_id, error = %err, "job creation failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn cancel_job(State(state): State<DeviceState>, Path(job_id): Path<String>) -> Response {
    let Some(handle) = state.registry.job(&state.device_id, &job_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match handle.state() {
        JobState::Created | JobState::Processing => {
            handle.job.cancel();
            handle.touch();
            StatusCode::OK.into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_image_info(
    State(state): State<DeviceState>,
    Path(job_id): Path<String>,
) -> Response {
    // 원본과 동일한 스텁: 잡이 있으면 빈 200
    match state.registry.job(&state.device_id, &job_id) {
        Some(_) => StatusCode::OK.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_progress(State(state): State<DeviceState>, Path(job_id): Path<String>) -> Response {
    let Some(handle) = state.registry.job(&state.device_id, &job_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !matches!(handle.state(), JobState::Created | JobState::Processing) {
        return StatusCode::NOT_FOUND.into_response();
    }
    handle.touch();

    let (mut writer, reader) = tokio::io::duplex(4096);
    let job = Arc::clone(&handle.job);
    tokio::spawn(async move {
        if let Err(err) = job.write_progress_to(&mut writer).await {
            tracing::debug!(error = %err, "progress stream ended with error");
        }
    });

    Body::from_stream(ReaderStream::new(reader)).into_response()
}

async fn get_error_details(
    State(state): State<DeviceState>,
    Path(job_id): Path<String>,
) -> Response {
    let Some(handle) = state.registry.job(&state.device_id, &job_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut buf = Vec::new();
    if let Err(err) = handle.job.write_error_details_to(&mut buf).await {
        tracing::error!(error = %err, "failed to render error details");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match String::from_utf8(buf) {
        Ok(doc) => xml_response(doc),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn next_document(State(state): State<DeviceState>, Path(job_id): Path<String>) -> Response {
    let Some(handle) = state.registry.job(&state.device_id, &job_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // 문서당 단일 소비자 보장. 가드는 문서 전송이 끝날 때까지 유지된다.
    let guard = Arc::clone(&handle.next_document_lock).lock_owned().await;

    // 락 대기 중 상태가 바뀌었을 수 있으므로 다시 확인한다
    if let Some(response) = reject_by_state(&handle) {
        return response;
    }

    let wait = tokio::time::timeout(
        state.config.next_document_wait,
        handle.job.wait_for_next_document(),
    )
    .await;

    match wait {
        Err(_elapsed) => {
            tracing::debug!(job_id = %handle.id, "waiting for document timed out, returning 503");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, state.config.retry_after_secs.to_string())],
            )
                .into_response()
        }
        Ok(Err(err)) => {
            tracing::debug!(job_id = %handle.id, error = %err, "error waiting for document");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Ok(Ok(false)) => match handle.state() {
            JobState::Canceled => StatusCode::GONE.into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        },
        Ok(Ok(true)) => {
            handle.touch();
            let content_type = handle.job.content_type().to_owned();
            let content_location = format!("/eSCL/ScanJobs/{}/1", handle.id);

            let (mut writer, reader) = tokio::io::duplex(64 * 1024);
            let job = Arc::clone(&handle.job);
            let handle = Arc::clone(&handle);
            let device_id = state.device_id.clone();
            tokio::spawn(async move {
                match job.write_document_to(&mut writer).await {
                    Ok(()) => {
                        handle.mark_transferred();
                        metrics::counter!(
                            m::SERVER_DOCUMENTS_SENT_TOTAL,
                            m::LABEL_DEVICE => device_id
                        )
                        .increment(1);
                    }
                    Err(err) => {
                        // 네트워크 문제로 가정하고 상태는 바꾸지 않는다.
                        // 문서는 소진되지 않았으므로 클라이언트가 재시도한다.
                        tracing::warn!(job_id = %handle.id, error = %err, "document write failed");
                    }
                }
                drop(guard);
            });

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header("Content-Location", content_location)
                .body(Body::from_stream(ReaderStream::new(reader)))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

fn reject_by_state(handle: &JobHandle) -> Option<Response> {
    match handle.state() {
        JobState::Failed => Some(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        JobState::Canceled => Some(StatusCode::GONE.into_response()),
        JobState::Succeeded => Some(StatusCode::NOT_FOUND.into_response()),
        JobState::Created | JobState::Processing => None,
    }
}
