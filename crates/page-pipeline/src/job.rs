//! 표준 스캔 잡 — 파이프라인 위의 잡 상태 기계
//!
//! [`PipelineJob`]은 [`run_producer`](crate::producer::run_producer)로
//! 시작한 페이지 시퀀스를 [`ScanJob`] 계약으로 감싸는 표준 구현입니다.
//!
//! # 상태 기계
//! ```text
//! Created → Processing → {Succeeded, Canceled, Failed}
//! ```
//!
//! 모든 상태 변이는 단일 `transition` 메서드로 직렬화되며, 전이마다
//! [`StatusTransition`] 레코드가 등록 순서대로 구독자에게 전달됩니다.
//!
//! # 종료 규칙
//! - 취소: 생산자가 취소를 관측하고 멈추면 `Canceled`로 정착합니다.
//! - 에러: 생산자 에러는 즉시 캡처되어 에러 스냅샷에 나타나지만,
//!   `Failed` 전이는 소비자가 다음 페이지를 요청하는 시점에 일어납니다.
//!   에러 이전에 생산된 페이지는 먼저 전달됩니다.
//! - 성공: 소비자가 시퀀스를 끝까지 소진한 시점에 `Succeeded`로
//!   전이합니다.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as TokioMutex, broadcast, watch};
use tokio_util::sync::CancellationToken;

use scanpost_core::device::{NS_PWG, NS_SCAN};
use scanpost_core::error::{JobError, ScanpostError};
use scanpost_core::event::{JobState, PageItem, ProgressEvent, StatusTransition};
use scanpost_core::job::{DocumentSink, ScanJob, TransitionListener};
use scanpost_core::metrics as m;

use crate::config::PipelineConfig;
use crate::error::PagePipelineError;
use crate::producer::{OutcomeKind, OutcomeSlot, PageProducer, PageStream, run_producer};

struct JobCore {
    state: JobState,
    listeners: Vec<TransitionListener>,
    /// 캡처된 생산자 에러 원인 — `Failed` 전이 전에도 채워질 수 있다
    error_cause: Option<String>,
}

/// 파이프라인 기반 표준 스캔 잡
pub struct PipelineJob {
    content_type: String,
    inner: StdMutex<JobCore>,
    /// 페이지 시퀀스 — 문서 대기 경로에서만 잠급니다
    stream: TokioMutex<PageStream>,
    /// 준비되었으나 아직 전송이 끝나지 않은 문서
    ///
    /// 전송이 끝까지 성공했을 때만 비워지므로, 연결 장애로 실패한
    /// 전송은 같은 문서로 재시도됩니다.
    current: TokioMutex<Option<PageItem>>,
    cancel: CancellationToken,
    outcome: Arc<OutcomeSlot>,
    progress_proto: broadcast::Receiver<ProgressEvent>,
    completion: watch::Receiver<bool>,
}

impl PipelineJob {
    /// 상태 전이를 수행합니다.
    ///
    /// 종료 상태에서는 아무 전이도 일어나지 않습니다. 전이가 수행되면
    /// 레코드를 만들어 구독자를 등록 순서대로 호출하고 `true`를
    /// 반환합니다.
    fn transition(&self, to: JobState, reason: Option<String>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() || inner.state == to {
            return false;
        }
        let record = StatusTransition::new(inner.state, to, reason);
        inner.state = to;
        tracing::debug!(transition = %record, "pipeline job transition");
        for listener in &inner.listeners {
            listener(&record);
        }
        true
    }

    fn set_error_cause(&self, cause: String) {
        let mut inner = self.inner.lock().unwrap();
        if inner.error_cause.is_none() {
            inner.error_cause = Some(cause);
        }
    }

    fn job_error(&self) -> ScanpostError {
        let cause = self
            .inner
            .lock()
            .unwrap()
            .error_cause
            .clone()
            .or_else(|| self.outcome.error_cause())
            .unwrap_or_else(|| "scan failed".to_owned());
        JobError::Failed { cause }.into()
    }

    /// 생산자 종료를 관측했을 때의 정리
    fn on_producer_end(&self) {
        match self.outcome.kind() {
            Some(OutcomeKind::Canceled) => {
                self.transition(JobState::Canceled, Some("canceled".to_owned()));
            }
            Some(OutcomeKind::Failed) => {
                // 에러는 즉시 캡처한다. Failed 전이는 소비 시점에 일어나
                // 에러 이전에 생산된 페이지가 먼저 전달될 수 있다.
                if let Some(cause) = self.outcome.error_cause() {
                    self.set_error_cause(cause);
                }
            }
            Some(OutcomeKind::Completed) | None => {}
        }
    }
}

impl ScanJob for PipelineJob {
    fn state(&self) -> JobState {
        self.inner.lock().unwrap().state
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.cancel.cancel();
        // 생산자가 이미 끝났다면 취소를 관측할 주체가 없으므로 즉시 정착한다
        if self.outcome.kind().is_some() {
            self.transition(JobState::Canceled, Some("canceled".to_owned()));
        }
    }

    fn register_transition_listener(&self, listener: TransitionListener) {
        self.inner.lock().unwrap().listeners.push(listener);
    }

    async fn wait_for_next_document(&self) -> Result<bool, ScanpostError> {
        // 취소가 요청된 잡은 더 이상 페이지를 전달하지 않는다
        if self.cancel.is_cancelled() {
            let mut completion = self.completion.clone();
            let _ = completion.wait_for(|done| *done).await;
            self.transition(JobState::Canceled, Some("canceled".to_owned()));
            return Ok(false);
        }

        match self.state() {
            JobState::Failed => return Err(self.job_error()),
            JobState::Canceled => return Ok(false),
            JobState::Succeeded => return Ok(false),
            JobState::Created | JobState::Processing => {}
        }

        // current 락을 먼저 잡아, 페이지를 꺼낸 뒤 보관하기 전에
        // (호출자의 타임아웃 등으로) 미래가 버려져 페이지를 잃는 창을 없앤다
        let mut current = self.current.lock().await;

        // 전송이 끝나지 않은 문서가 남아 있으면 같은 문서를 다시 제공한다
        if current.is_some() {
            return Ok(true);
        }

        let mut stream = self.stream.lock().await;
        match stream.next().await {
            Ok(Some(item)) => {
                *current = Some(item);
                Ok(true)
            }
            Ok(None) => {
                drop(stream);
                if self.cancel.is_cancelled()
                    || self.outcome.kind() == Some(OutcomeKind::Canceled)
                {
                    self.transition(JobState::Canceled, Some("canceled".to_owned()));
                } else {
                    self.transition(JobState::Succeeded, None);
                }
                Ok(false)
            }
            Err(err) => {
                drop(stream);
                let cause = err.to_string();
                self.set_error_cause(cause.clone());
                self.transition(JobState::Failed, Some(cause));
                Err(err)
            }
        }
    }

    async fn write_document_to<'a>(&'a self, out: DocumentSink<'a>) -> Result<(), ScanpostError> {
        let mut current = self.current.lock().await;
        let Some(item) = current.as_ref() else {
            return Err(JobError::InvalidState {
                state: self.state().to_string(),
                reason: "no document is ready".to_owned(),
            }
            .into());
        };

        out.write_all(&item.data).await?;
        out.flush().await?;
        metrics::counter!(m::PIPELINE_PAGES_DELIVERED_TOTAL).increment(1);

        // 끝까지 성공한 경우에만 문서를 소진한다
        *current = None;
        Ok(())
    }

    async fn write_progress_to<'a>(&'a self, out: DocumentSink<'a>) -> Result<(), ScanpostError> {
        if self.state().is_terminal() || self.outcome.kind().is_some() {
            return Ok(());
        }

        let mut progress = self.progress_proto.resubscribe();
        let mut completion = self.completion.clone();
        loop {
            tokio::select! {
                _ = async { completion.wait_for(|done| *done).await.map(|_| ()) } => break,
                event = progress.recv() => match event {
                    Ok(ProgressEvent::Page(fraction)) => {
                        out.write_all(format!("{fraction}\n").as_bytes()).await?;
                        out.flush().await?;
                    }
                    Ok(ProgressEvent::PageEnd) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        Ok(())
    }

    async fn write_error_details_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> Result<(), ScanpostError> {
        let (state, cause) = {
            let inner = self.inner.lock().unwrap();
            (inner.state, inner.error_cause.clone())
        };
        let cause = cause.or_else(|| self.outcome.error_cause());

        let mut doc = String::with_capacity(256);
        doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        doc.push_str(&format!(
            "<scan:ErrorDetails xmlns:scan=\"{NS_SCAN}\" xmlns:pwg=\"{NS_PWG}\">"
        ));
        doc.push_str(&format!(
            "<pwg:JobState>{}</pwg:JobState>",
            state.wire_name()
        ));
        if let Some(cause) = cause {
            doc.push_str(&format!(
                "<scan:JobStateReason>{}</scan:JobStateReason>",
                quick_xml::escape::escape(cause.as_str())
            ));
        }
        doc.push_str("</scan:ErrorDetails>");

        out.write_all(doc.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

// ─── PipelineJobBuilder ──────────────────────────────────────────────

/// 파이프라인 잡 빌더
///
/// 생산자와 설정을 조립하여 이미 시작된 잡을 반환합니다.
pub struct PipelineJobBuilder {
    content_type: String,
    config: PipelineConfig,
    producer: Option<PageProducer>,
}

impl PipelineJobBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            content_type: "image/jpeg".to_owned(),
            config: PipelineConfig::default(),
            producer: None,
        }
    }

    /// 생산 문서의 Content-Type을 지정합니다.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 생산자 루틴을 지정합니다.
    pub fn producer(mut self, producer: PageProducer) -> Self {
        self.producer = Some(producer);
        self
    }

    /// 잡을 빌드하고 파이프라인을 시작합니다.
    ///
    /// 반환 시점에 잡은 `Processing` 상태입니다.
    pub fn build(self) -> Result<Arc<PipelineJob>, PagePipelineError> {
        self.config.validate()?;
        let producer = self.producer.ok_or_else(|| PagePipelineError::Config {
            field: "producer".to_owned(),
            reason: "a page producer is required".to_owned(),
        })?;

        let stream = run_producer(producer, &self.config);
        let cancel = stream.cancel_token();
        let outcome = stream.outcome_slot();
        let progress_proto = stream.subscribe_progress();
        let completion = stream.completion();

        let job = Arc::new(PipelineJob {
            content_type: self.content_type,
            inner: StdMutex::new(JobCore {
                state: JobState::Created,
                listeners: Vec::new(),
                error_cause: None,
            }),
            stream: TokioMutex::new(stream),
            current: TokioMutex::new(None),
            cancel,
            outcome,
            progress_proto,
            completion,
        });
        job.transition(JobState::Processing, None);

        // 생산자 종료를 관측하여 취소 정착과 에러 캡처를 수행한다
        let watcher = Arc::clone(&job);
        tokio::spawn(async move {
            let mut completion = watcher.completion.clone();
            if completion.wait_for(|done| *done).await.is_ok() {
                watcher.on_producer_end();
            }
        });

        Ok(job)
    }
}

impl Default for PipelineJobBuilder {
    fn default() -> Self {
        Self::new()
    }
}
