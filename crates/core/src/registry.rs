//! 디바이스 레지스트리 — 노출 디바이스와 활성 잡의 장부
//!
//! [`DeviceRegistry`]는 현재 노출 중인 디바이스 설정과 디바이스별 활성
//! 잡을 추적합니다. "디바이스당 비종료 잡 최대 하나" 불변식은 디바이스
//! 슬롯 락 안에서 점유 확인과 잡 등록을 한 번에 수행하여 보장합니다.
//!
//! # 잠금 규율
//!
//! - 디바이스 맵 전체: `RwLock` — 등록/해제만 쓰기 락을 잡습니다.
//! - 디바이스별 잡 슬롯: 엔트리 내부 `Mutex` — 서로 다른 디바이스의
//!   잡 생성은 서로를 차단하지 않습니다.
//! - 개별 잡 상태 변이는 잡 자체의 전이 메서드로 직렬화됩니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::device::{DeviceConfig, ScanSettings, ScannerCapabilities};
use crate::error::{ConfigError, DeviceError, ScanpostError};
use crate::event::JobState;
use crate::job::DynScanJob;
use crate::metrics as m;

// ─── JobHandle ───────────────────────────────────────────────────────

/// 레지스트리가 추적하는 잡 한 건
///
/// 잡 본체([`DynScanJob`])에 프로토콜 레이어가 필요로 하는 장부
/// (식별자, 최근 활동 시각, 전송 카운터, 문서 전송 직렬화 락)를
/// 덧붙입니다.
pub struct JobHandle {
    /// 잡 식별자 (UUID v4)
    pub id: String,
    /// 잡이 속한 디바이스 식별자
    pub device_id: String,
    /// 잡 본체
    pub job: Arc<dyn DynScanJob>,
    /// NextDocument 처리 직렬화 락 — 문서당 단일 소비자 보장
    ///
    /// `Arc`로 감싸 소유 가드(`lock_owned`)를 응답 스트리밍 태스크로
    /// 넘길 수 있게 합니다.
    pub next_document_lock: Arc<tokio::sync::Mutex<()>>,
    /// 마지막 활동 시각 (상태 전이/문서 전송 시 갱신)
    last_updated: Arc<Mutex<Instant>>,
    /// 전송 완료된 문서 수
    images_completed: AtomicU32,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("images_completed", &self.images_completed)
            .finish_non_exhaustive()
    }
}

impl JobHandle {
    fn new(device_id: &str, job: Arc<dyn DynScanJob>) -> Arc<Self> {
        let last_updated = Arc::new(Mutex::new(Instant::now()));

        // 상태 전이마다 활동 시각을 갱신하고 로그를 남긴다.
        let id = uuid::Uuid::new_v4().to_string();
        let touch = Arc::clone(&last_updated);
        let log_id = id.clone();
        job.register_transition_listener(Box::new(move |transition| {
            *touch.lock().unwrap() = Instant::now();
            tracing::debug!(job_id = %log_id, transition = %transition, "job status transition");
            if transition.to.is_terminal() {
                metrics::counter!(m::JOBS_FINISHED_TOTAL, m::LABEL_STATE => transition.to.to_string())
                    .increment(1);
            }
        }));

        Arc::new(Self {
            id,
            device_id: device_id.to_owned(),
            job,
            next_document_lock: Arc::new(tokio::sync::Mutex::new(())),
            last_updated,
            images_completed: AtomicU32::new(0),
        })
    }

    /// 현재 잡 상태를 반환합니다.
    pub fn state(&self) -> JobState {
        self.job.state()
    }

    /// 마지막 활동 이후 경과 시간을 반환합니다.
    pub fn idle_for(&self) -> Duration {
        self.last_updated.lock().unwrap().elapsed()
    }

    /// 활동 시각을 지금으로 갱신합니다.
    pub fn touch(&self) {
        *self.last_updated.lock().unwrap() = Instant::now();
    }

    /// 문서 한 건의 전송 완료를 기록합니다.
    pub fn mark_transferred(&self) {
        self.images_completed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// 전송 완료된 문서 수를 반환합니다.
    pub fn images_completed(&self) -> u32 {
        self.images_completed.load(Ordering::Relaxed)
    }
}

/// ScannerStatus 문서용 잡 요약
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    /// 잡 식별자
    pub id: String,
    /// 현재 상태
    pub state: JobState,
    /// 마지막 활동 이후 경과 시간 (초, 올림)
    pub age_secs: u64,
    /// 전송 완료된 문서 수
    pub images_completed: u32,
    /// 남은 전송 예정 문서 수 (처리 중이면 1)
    pub images_to_transfer: u32,
}

// ─── DeviceRegistry ──────────────────────────────────────────────────

struct DeviceEntry {
    config: DeviceConfig,
    /// 활성 잡과 유예 기간 내의 종료 잡 (등록 순서 유지)
    jobs: Mutex<Vec<Arc<JobHandle>>>,
}

/// 디바이스 레지스트리
///
/// 모든 변이는 직렬화되며, 읽기(능력 조회, 상태 스냅샷)는 다른
/// 디바이스의 잡 생성을 차단하지 않습니다.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<DeviceEntry>>>,
    /// 종료 잡을 상태 조회용으로 유지하는 유예 기간
    retention: Duration,
    /// 비종료 잡을 유휴 상태로 방치할 수 있는 최대 시간
    idle_timeout: Duration,
}

impl DeviceRegistry {
    /// 새 레지스트리를 생성합니다.
    pub fn new(retention: Duration, idle_timeout: Duration) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            retention,
            idle_timeout,
        }
    }

    /// 디바이스를 식별자 아래 등록합니다.
    ///
    /// 이미 등록된 식별자면 [`ConfigError::DuplicateDevice`]를 반환합니다.
    pub fn add_device(&self, config: DeviceConfig) -> Result<(), ScanpostError> {
        let mut devices = self.devices.write().unwrap();
        if devices.contains_key(&config.id) {
            return Err(ConfigError::DuplicateDevice {
                id: config.id.clone(),
            }
            .into());
        }
        tracing::info!(device = %config.id, "device registered");
        devices.insert(
            config.id.clone(),
            Arc::new(DeviceEntry {
                config,
                jobs: Mutex::new(Vec::new()),
            }),
        );
        metrics::gauge!(m::REGISTRY_DEVICES).set(devices.len() as f64);
        Ok(())
    }

    /// 디바이스 등록을 해제합니다.
    ///
    /// 활성 잡이 있으면 먼저 취소를 요청합니다. 취소는 협조적이므로
    /// 잡이 즉시 종료 상태가 되지는 않을 수 있습니다.
    pub fn remove_device(&self, id: &str) -> Result<(), ScanpostError> {
        let entry = {
            let mut devices = self.devices.write().unwrap();
            let entry = devices
                .remove(id)
                .ok_or_else(|| DeviceError::NotFound { id: id.to_owned() })?;
            metrics::gauge!(m::REGISTRY_DEVICES).set(devices.len() as f64);
            entry
        };
        for handle in entry.jobs.lock().unwrap().iter() {
            if !handle.state().is_terminal() {
                tracing::info!(device = %id, job_id = %handle.id, "canceling job of removed device");
                handle.job.cancel();
            }
        }
        tracing::info!(device = %id, "device removed");
        Ok(())
    }

    /// 등록된 디바이스 식별자 목록을 반환합니다.
    pub fn device_ids(&self) -> Vec<String> {
        self.devices.read().unwrap().keys().cloned().collect()
    }

    /// 디바이스 설정의 복제본을 반환합니다.
    pub fn device_config(&self, id: &str) -> Option<DeviceConfig> {
        self.devices
            .read()
            .unwrap()
            .get(id)
            .map(|e| e.config.clone())
    }

    /// 디바이스 능력 기술자를 반환합니다.
    pub fn capabilities(&self, id: &str) -> Option<ScannerCapabilities> {
        self.devices
            .read()
            .unwrap()
            .get(id)
            .map(|e| e.config.capabilities.clone())
    }

    /// 디바이스에 새 잡을 생성합니다.
    ///
    /// 1. 요청 옵션을 능력과 대조해 검증합니다 — 실패 시 잡을 만들지
    ///    않고 [`ConfigError::UnsupportedOption`]을 반환하며 디바이스는
    ///    비어 있는 상태로 남습니다.
    /// 2. 슬롯 락 안에서 비종료 잡 존재 여부를 확인하고, 비어 있으면
    ///    팩토리를 호출해 그 자리에서 등록합니다. 동시 요청 중 정확히
    ///    하나만 성공하고 나머지는 [`DeviceError::Busy`]를 받습니다.
    pub fn create_job_for(
        &self,
        device_id: &str,
        settings: &ScanSettings,
    ) -> Result<Arc<JobHandle>, ScanpostError> {
        let entry = self
            .devices
            .read()
            .unwrap()
            .get(device_id)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound {
                id: device_id.to_owned(),
            })?;

        settings.validate_against(&entry.config.capabilities)?;

        let mut jobs = entry.jobs.lock().unwrap();
        if jobs.iter().any(|h| !h.state().is_terminal()) {
            metrics::counter!(m::REGISTRY_JOBS_REJECTED_TOTAL).increment(1);
            return Err(DeviceError::Busy {
                id: device_id.to_owned(),
            }
            .into());
        }

        let job = (entry.config.factory)(settings)?;
        let handle = JobHandle::new(device_id, job);
        jobs.push(Arc::clone(&handle));
        metrics::counter!(m::REGISTRY_JOBS_CREATED_TOTAL).increment(1);
        tracing::info!(device = %device_id, job_id = %handle.id, "scan job created");
        Ok(handle)
    }

    /// 잡을 조회합니다.
    pub fn job(&self, device_id: &str, job_id: &str) -> Option<Arc<JobHandle>> {
        let entry = self.devices.read().unwrap().get(device_id).cloned()?;
        let jobs = entry.jobs.lock().unwrap();
        jobs.iter().find(|h| h.id == job_id).cloned()
    }

    /// 디바이스의 잡 요약 목록을 최근 활동 순으로 반환합니다.
    pub fn jobs_snapshot(&self, device_id: &str) -> Vec<JobSnapshot> {
        let Some(entry) = self.devices.read().unwrap().get(device_id).cloned() else {
            return Vec::new();
        };
        let jobs = entry.jobs.lock().unwrap();
        let mut snapshots: Vec<(Duration, JobSnapshot)> = jobs
            .iter()
            .map(|h| {
                let idle = h.idle_for();
                let state = h.state();
                (
                    idle,
                    JobSnapshot {
                        id: h.id.clone(),
                        state,
                        age_secs: idle.as_secs_f64().ceil() as u64,
                        images_completed: h.images_completed(),
                        images_to_transfer: u32::from(state == JobState::Processing),
                    },
                )
            })
            .collect();
        snapshots.sort_by_key(|(idle, _)| *idle);
        snapshots.into_iter().map(|(_, s)| s).collect()
    }

    /// 디바이스에 처리 중인 잡이 있는지 반환합니다.
    pub fn is_processing(&self, device_id: &str) -> bool {
        let Some(entry) = self.devices.read().unwrap().get(device_id).cloned() else {
            return false;
        };
        let jobs = entry.jobs.lock().unwrap();
        jobs.iter().any(|h| !h.state().is_terminal())
    }

    /// 잡을 장부에서 명시적으로 제거합니다.
    ///
    /// 종료 후 상태 조회 유예가 더 이상 필요 없을 때 프로토콜 레이어가
    /// 호출합니다. 제거 여부를 반환합니다.
    pub fn release_job(&self, device_id: &str, job_id: &str) -> bool {
        let Some(entry) = self.devices.read().unwrap().get(device_id).cloned() else {
            return false;
        };
        let mut jobs = entry.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|h| h.id != job_id);
        before != jobs.len()
    }

    /// 비종료 잡의 총 수를 반환합니다.
    pub fn active_job_count(&self) -> usize {
        let devices = self.devices.read().unwrap();
        devices
            .values()
            .map(|e| {
                e.jobs
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|h| !h.state().is_terminal())
                    .count()
            })
            .sum()
    }

    /// 모든 비종료 잡에 취소를 요청합니다.
    pub fn cancel_all(&self) {
        let devices = self.devices.read().unwrap();
        for entry in devices.values() {
            for handle in entry.jobs.lock().unwrap().iter() {
                if !handle.state().is_terminal() {
                    handle.job.cancel();
                }
            }
        }
    }

    /// 만료된 잡을 정리합니다.
    ///
    /// - 유예 기간을 넘긴 종료 잡은 장부에서 제거합니다.
    /// - 유휴 시간 제한을 넘긴 비종료 잡은 취소를 요청합니다.
    ///   클라이언트가 스트림 중간에 사라진 잡은 이 경로로 회수됩니다.
    pub fn purge_expired(&self) {
        let devices = self.devices.read().unwrap();
        for (device_id, entry) in devices.iter() {
            let mut jobs = entry.jobs.lock().unwrap();
            for handle in jobs.iter() {
                if !handle.state().is_terminal() && handle.idle_for() > self.idle_timeout {
                    tracing::warn!(
                        device = %device_id,
                        job_id = %handle.id,
                        idle_secs = handle.idle_for().as_secs(),
                        "canceling idle job"
                    );
                    handle.job.cancel();
                }
            }
            jobs.retain(|h| {
                let expired = h.state().is_terminal() && h.idle_for() > self.retention;
                if expired {
                    tracing::debug!(device = %device_id, job_id = %h.id, "purging terminal job");
                }
                !expired
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::error::JobError;
    use crate::event::StatusTransition;
    use crate::job::{DocumentSink, ScanJob, TransitionListener};

    /// 테스트용 Mock 잡 — 상태만 추적합니다.
    struct MockJob {
        state: StdMutex<JobState>,
        listeners: StdMutex<Vec<TransitionListener>>,
    }

    impl MockJob {
        fn processing() -> Arc<Self> {
            Arc::new(Self {
                state: StdMutex::new(JobState::Processing),
                listeners: StdMutex::new(Vec::new()),
            })
        }

        fn current_state(&self) -> JobState {
            *self.state.lock().unwrap()
        }

        fn transition(&self, to: JobState) {
            let mut state = self.state.lock().unwrap();
            let record = StatusTransition::new(*state, to, None);
            *state = to;
            drop(state);
            for listener in self.listeners.lock().unwrap().iter() {
                listener(&record);
            }
        }
    }

    impl ScanJob for MockJob {
        fn state(&self) -> JobState {
            *self.state.lock().unwrap()
        }

        fn content_type(&self) -> &str {
            "image/jpeg"
        }

        fn cancel(&self) {
            if !self.current_state().is_terminal() {
                self.transition(JobState::Canceled);
            }
        }

        fn register_transition_listener(&self, listener: TransitionListener) {
            self.listeners.lock().unwrap().push(listener);
        }

        async fn wait_for_next_document(&self) -> Result<bool, ScanpostError> {
            Ok(false)
        }

        async fn write_document_to<'a>(
            &'a self,
            _out: DocumentSink<'a>,
        ) -> Result<(), ScanpostError> {
            Ok(())
        }

        async fn write_progress_to<'a>(
            &'a self,
            _out: DocumentSink<'a>,
        ) -> Result<(), ScanpostError> {
            Ok(())
        }

        async fn write_error_details_to<'a>(
            &'a self,
            _out: DocumentSink<'a>,
        ) -> Result<(), ScanpostError> {
            Ok(())
        }
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Duration::from_secs(30), Duration::from_secs(120))
    }

    fn device(id: &str) -> (DeviceConfig, Arc<StdMutex<Vec<Arc<MockJob>>>>) {
        let created: Arc<StdMutex<Vec<Arc<MockJob>>>> = Arc::new(StdMutex::new(Vec::new()));
        let created_clone = Arc::clone(&created);
        let factory: crate::device::JobFactory = Arc::new(move |_settings| {
            let job = MockJob::processing();
            created_clone.lock().unwrap().push(Arc::clone(&job));
            Ok(job as Arc<dyn DynScanJob>)
        });
        (
            DeviceConfig::new(id, ScannerCapabilities::default(), factory),
            created,
        )
    }

    #[test]
    fn duplicate_device_id_rejected() {
        let registry = registry();
        let (config, _) = device("scanner-1");
        registry.add_device(config.clone()).unwrap();

        let err = registry.add_device(config).unwrap_err();
        assert!(matches!(
            err,
            ScanpostError::Config(ConfigError::DuplicateDevice { .. })
        ));
        assert_eq!(registry.device_ids().len(), 1);
    }

    #[test]
    fn second_concurrent_job_gets_busy() {
        let registry = registry();
        let (config, _) = device("scanner-1");
        registry.add_device(config).unwrap();

        let settings = ScanSettings::default();
        let first = registry.create_job_for("scanner-1", &settings).unwrap();
        assert_eq!(first.state(), JobState::Processing);

        let err = registry.create_job_for("scanner-1", &settings).unwrap_err();
        assert!(matches!(
            err,
            ScanpostError::Device(DeviceError::Busy { .. })
        ));
    }

    #[test]
    fn unsupported_option_leaves_device_free() {
        let registry = registry();
        let (config, created) = device("scanner-1");
        registry.add_device(config).unwrap();

        let bad = ScanSettings {
            x_resolution: 9999,
            y_resolution: 9999,
            ..Default::default()
        };
        let err = registry.create_job_for("scanner-1", &bad).unwrap_err();
        assert!(matches!(
            err,
            ScanpostError::Config(ConfigError::UnsupportedOption { .. })
        ));
        // 팩토리는 호출되지 않았고 디바이스는 비어 있다
        assert!(created.lock().unwrap().is_empty());
        assert!(
            registry
                .create_job_for("scanner-1", &ScanSettings::default())
                .is_ok()
        );
    }

    #[test]
    fn slot_frees_after_terminal_and_release() {
        let registry = registry();
        let (config, created) = device("scanner-1");
        registry.add_device(config).unwrap();

        let settings = ScanSettings::default();
        let handle = registry.create_job_for("scanner-1", &settings).unwrap();
        created.lock().unwrap()[0].transition(JobState::Succeeded);

        // 종료 후에는 새 잡을 받을 수 있다
        let second = registry.create_job_for("scanner-1", &settings).unwrap();
        assert_ne!(handle.id, second.id);

        // 종료된 첫 잡은 유예 기간 동안 여전히 조회 가능하다
        assert!(registry.job("scanner-1", &handle.id).is_some());
        assert!(registry.release_job("scanner-1", &handle.id));
        assert!(registry.job("scanner-1", &handle.id).is_none());
    }

    #[test]
    fn remove_device_cancels_active_job() {
        let registry = registry();
        let (config, created) = device("scanner-1");
        registry.add_device(config).unwrap();

        registry
            .create_job_for("scanner-1", &ScanSettings::default())
            .unwrap();
        registry.remove_device("scanner-1").unwrap();

        assert_eq!(created.lock().unwrap()[0].current_state(), JobState::Canceled);
        assert!(registry.device_ids().is_empty());
    }

    #[test]
    fn jobs_snapshot_reports_counters() {
        let registry = registry();
        let (config, _) = device("scanner-1");
        registry.add_device(config).unwrap();

        let handle = registry
            .create_job_for("scanner-1", &ScanSettings::default())
            .unwrap();
        handle.mark_transferred();
        handle.mark_transferred();

        let snapshot = registry.jobs_snapshot("scanner-1");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].images_completed, 2);
        assert_eq!(snapshot[0].images_to_transfer, 1);
        assert_eq!(snapshot[0].state, JobState::Processing);
    }

    #[test]
    fn purge_removes_expired_terminal_jobs() {
        let registry = DeviceRegistry::new(Duration::ZERO, Duration::from_secs(120));
        let (config, created) = device("scanner-1");
        registry.add_device(config).unwrap();

        let handle = registry
            .create_job_for("scanner-1", &ScanSettings::default())
            .unwrap();
        created.lock().unwrap()[0].transition(JobState::Succeeded);

        registry.purge_expired();
        assert!(registry.job("scanner-1", &handle.id).is_none());
    }

    #[test]
    fn purge_cancels_idle_processing_jobs() {
        let registry = DeviceRegistry::new(Duration::from_secs(30), Duration::ZERO);
        let (config, created) = device("scanner-1");
        registry.add_device(config).unwrap();

        registry
            .create_job_for("scanner-1", &ScanSettings::default())
            .unwrap();
        registry.purge_expired();

        assert_eq!(created.lock().unwrap()[0].current_state(), JobState::Canceled);
    }

    #[test]
    fn cancel_all_hits_every_device() {
        let registry = registry();
        let (config_a, created_a) = device("scanner-a");
        let (config_b, created_b) = device("scanner-b");
        registry.add_device(config_a).unwrap();
        registry.add_device(config_b).unwrap();

        registry
            .create_job_for("scanner-a", &ScanSettings::default())
            .unwrap();
        registry
            .create_job_for("scanner-b", &ScanSettings::default())
            .unwrap();
        assert_eq!(registry.active_job_count(), 2);

        registry.cancel_all();
        assert_eq!(registry.active_job_count(), 0);
        assert_eq!(created_a.lock().unwrap()[0].current_state(), JobState::Canceled);
        assert_eq!(created_b.lock().unwrap()[0].current_state(), JobState::Canceled);
    }

    #[tokio::test]
    async fn concurrent_creation_exactly_one_wins() {
        let registry = Arc::new(registry());
        let (config, _) = device("scanner-1");
        registry.add_device(config).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::task::spawn_blocking(move || {
                registry
                    .create_job_for("scanner-1", &ScanSettings::default())
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn transition_listener_updates_activity() {
        let registry = registry();
        let (config, created) = device("scanner-1");
        registry.add_device(config).unwrap();

        let handle = registry
            .create_job_for("scanner-1", &ScanSettings::default())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let idle_before = handle.idle_for();

        created.lock().unwrap()[0].transition(JobState::Succeeded);
        assert!(handle.idle_for() < idle_before);
    }
}
