//! 메트릭 상수 — Prometheus 메트릭 이름의 중앙 정의
//!
//! 각 구성요소는 이 상수를 사용하여 `metrics::counter!()`,
//! `metrics::gauge!()`, `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `scanpost_`
//! - 구성요소명: `registry_`, `pipeline_`, `server_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)

// ─── 레이블 키 상수 ──────────────────────────────────────────────────

/// 디바이스 레이블 키
pub const LABEL_DEVICE: &str = "device";

/// 잡 종료 상태 레이블 키 (succeeded, canceled, failed)
pub const LABEL_STATE: &str = "state";

// ─── Registry 메트릭 ─────────────────────────────────────────────────

/// Registry: 등록된 디바이스 수 (gauge)
pub const REGISTRY_DEVICES: &str = "scanpost_registry_devices";

/// Registry: 생성된 잡 수 (counter)
pub const REGISTRY_JOBS_CREATED_TOTAL: &str = "scanpost_registry_jobs_created_total";

/// Registry: busy로 거부된 잡 생성 요청 수 (counter)
pub const REGISTRY_JOBS_REJECTED_TOTAL: &str = "scanpost_registry_jobs_rejected_total";

/// 종료 상태별 잡 수 (counter, label: state)
pub const JOBS_FINISHED_TOTAL: &str = "scanpost_jobs_finished_total";

// ─── Pipeline 메트릭 ─────────────────────────────────────────────────

/// Pipeline: 생산된 페이지 수 (counter)
pub const PIPELINE_PAGES_PRODUCED_TOTAL: &str = "scanpost_pipeline_pages_produced_total";

/// Pipeline: 소비자에게 전달된 페이지 수 (counter)
pub const PIPELINE_PAGES_DELIVERED_TOTAL: &str = "scanpost_pipeline_pages_delivered_total";

/// Pipeline: 생산자 에러 수 (counter)
pub const PIPELINE_PRODUCER_ERRORS_TOTAL: &str = "scanpost_pipeline_producer_errors_total";

// ─── Server 메트릭 ───────────────────────────────────────────────────

/// Server: 활성 리스너 수 (gauge)
pub const SERVER_LISTENERS: &str = "scanpost_server_listeners";

/// Server: 전송 완료된 문서 수 (counter, label: device)
pub const SERVER_DOCUMENTS_SENT_TOTAL: &str = "scanpost_server_documents_sent_total";

// ─── Daemon 메트릭 ───────────────────────────────────────────────────

/// Daemon: 빌드 정보 (gauge, label: version)
pub const DAEMON_BUILD_INFO: &str = "scanpost_daemon_build_info";

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "scanpost_daemon_uptime_seconds";
