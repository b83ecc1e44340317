//! 생산자 실행 — 푸시 방식 루틴을 풀 방식 시퀀스로 변환
//!
//! [`run_producer`]는 생산자 루틴을 독립 태스크에서 실행하고, 그 출력에
//! 대한 단일 소비(single-pass) 시퀀스 [`PageStream`]을 반환합니다.
//!
//! # 완료 신호
//! 완료는 정확히 한 번 기록됩니다. 생산자의 정상 반환, 에러 반환,
//! 패닉 모두 감독 태스크가 결과를 기록한 뒤에야 채널을 닫으므로,
//! 소비자가 시퀀스 끝을 관측하는 시점에는 항상 결과가 준비되어
//! 있습니다. 에러는 아무도 페이지를 요청하지 않아도 기록되고 로그에
//! 남습니다.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use scanpost_core::error::{JobError, ScanpostError};
use scanpost_core::event::{PageItem, ProgressEvent};
use scanpost_core::job::BoxFuture;
use scanpost_core::metrics as m;

use crate::config::PipelineConfig;
use crate::sink::PageSink;

/// 생산자 루틴
///
/// 싱크를 받아 페이지를 밀어 넣고, 끝나면 반환합니다.
/// [`SinkClosed`](crate::error::SinkClosed)를 관측한 생산자는
/// `Ok(())`로 반환해야 합니다 — 취소는 에러가 아닙니다.
pub type PageProducer =
    Box<dyn FnOnce(PageSink) -> BoxFuture<'static, Result<(), ScanpostError>> + Send>;

/// 생산자 종료 결과의 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// 정상 완료
    Completed,
    /// 취소를 관측하고 중단됨
    Canceled,
    /// 에러로 종료됨
    Failed,
}

/// 생산자 종료 결과 슬롯
///
/// 감독 태스크가 정확히 한 번 기록합니다. 에러 본체는 소비자가
/// 한 번 가져갈 수 있고, 종류는 소비되지 않고 조회할 수 있습니다.
#[derive(Debug, Default)]
pub(crate) struct OutcomeSlot {
    kind: Mutex<Option<OutcomeKind>>,
    error: Mutex<Option<ScanpostError>>,
}

impl OutcomeSlot {
    pub(crate) fn record(&self, kind: OutcomeKind, error: Option<ScanpostError>) {
        let mut slot = self.kind.lock().unwrap();
        // 완료는 한 번만 기록된다
        if slot.is_some() {
            return;
        }
        *slot = Some(kind);
        *self.error.lock().unwrap() = error;
    }

    pub(crate) fn kind(&self) -> Option<OutcomeKind> {
        *self.kind.lock().unwrap()
    }

    pub(crate) fn take_error(&self) -> Option<ScanpostError> {
        self.error.lock().unwrap().take()
    }

    pub(crate) fn error_cause(&self) -> Option<String> {
        self.error.lock().unwrap().as_ref().map(|e| e.to_string())
    }
}

/// 생산된 페이지의 단일 소비 시퀀스
///
/// 재시작할 수 없으며 각 페이지는 한 번만 소비됩니다. 시퀀스를 끝까지
/// 소비하기 전에 버리면(drop) 취소 토큰이 작동하여 생산자에게
/// 중단 신호를 보냅니다.
pub struct PageStream {
    rx: mpsc::Receiver<PageItem>,
    outcome: Arc<OutcomeSlot>,
    cancel: CancellationToken,
    progress_tx: broadcast::Sender<ProgressEvent>,
    completion: watch::Receiver<bool>,
}

impl PageStream {
    /// 다음 페이지를 기다립니다.
    ///
    /// - `Ok(Some(page))`: 생산 순서대로 다음 페이지
    /// - `Ok(None)`: 시퀀스 정상 종료 (완료 또는 취소)
    /// - `Err(_)`: 생산자가 k장 생산 후 에러로 종료했다면, k장이 모두
    ///   전달된 뒤 그 에러가 여기서 돌아옵니다
    pub async fn next(&mut self) -> Result<Option<PageItem>, ScanpostError> {
        match self.rx.recv().await {
            Some(item) => Ok(Some(item)),
            None => match self.outcome.kind() {
                Some(OutcomeKind::Failed) => {
                    Err(self.outcome.take_error().unwrap_or_else(|| {
                        JobError::Failed {
                            cause: "producer failed".to_owned(),
                        }
                        .into()
                    }))
                }
                _ => Ok(None),
            },
        }
    }

    /// 시퀀스를 닫고 생산자에게 중단 신호를 보냅니다.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// 취소 토큰의 복제본을 반환합니다.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 진행률 이벤트 구독을 생성합니다.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// 완료 신호 수신기의 복제본을 반환합니다.
    ///
    /// 생산자 종료 결과가 기록되면 `true`로 바뀝니다.
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.completion.clone()
    }

    /// 생산자 종료 결과의 종류를 반환합니다 (아직 실행 중이면 `None`).
    pub fn outcome_kind(&self) -> Option<OutcomeKind> {
        self.outcome.kind()
    }

    pub(crate) fn outcome_slot(&self) -> Arc<OutcomeSlot> {
        Arc::clone(&self.outcome)
    }

    /// 기록된 에러의 원인 문자열을 반환합니다 (소비하지 않음).
    pub fn error_cause(&self) -> Option<String> {
        self.outcome.error_cause()
    }
}

impl Drop for PageStream {
    fn drop(&mut self) {
        // 소비자가 사라지면 생산자도 중단되어야 한다
        self.cancel.cancel();
    }
}

/// 생산자를 독립 태스크에서 실행하고 페이지 시퀀스를 반환합니다.
///
/// 반환된 시퀀스는 지연 소비되는 단일 소비 시퀀스입니다. 생산자의
/// 종료(정상/에러/패닉)는 감독 태스크가 결과 슬롯에 기록한 뒤 채널을
/// 닫는 방식으로 정확히 한 번 신호됩니다.
pub fn run_producer(producer: PageProducer, config: &PipelineConfig) -> PageStream {
    let (tx, rx) = mpsc::channel(config.page_buffer_capacity);
    let (progress_tx, _) = broadcast::channel(config.progress_channel_capacity);
    let (done_tx, done_rx) = watch::channel(false);
    let cancel = CancellationToken::new();
    let outcome = Arc::new(OutcomeSlot::default());

    let sink = PageSink::new(tx.clone(), progress_tx.clone(), cancel.clone());
    let producer_task = tokio::spawn(producer(sink));

    // 감독 태스크: 결과를 기록한 뒤에야 마지막 송신자를 떨어뜨려
    // 채널을 닫는다. 소비자는 닫힌 채널을 볼 때 항상 결과를 읽을 수 있다.
    let supervisor_outcome = Arc::clone(&outcome);
    let supervisor_cancel = cancel.clone();
    tokio::spawn(async move {
        let last_sender = tx;
        match producer_task.await {
            Ok(Ok(())) => {
                if supervisor_cancel.is_cancelled() {
                    tracing::debug!("page producer stopped after cancellation");
                    supervisor_outcome.record(OutcomeKind::Canceled, None);
                } else {
                    tracing::debug!("page producer completed");
                    supervisor_outcome.record(OutcomeKind::Completed, None);
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "page producer failed");
                metrics::counter!(m::PIPELINE_PRODUCER_ERRORS_TOTAL).increment(1);
                supervisor_outcome.record(OutcomeKind::Failed, Some(err));
            }
            Err(join_err) if join_err.is_cancelled() => {
                supervisor_outcome.record(OutcomeKind::Canceled, None);
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "page producer panicked");
                metrics::counter!(m::PIPELINE_PRODUCER_ERRORS_TOTAL).increment(1);
                supervisor_outcome
                    .record(OutcomeKind::Failed, Some(JobError::ProducerPanicked.into()));
            }
        }
        drop(last_sender);
        let _ = done_tx.send(true);
    });

    PageStream {
        rx,
        outcome,
        cancel,
        progress_tx,
        completion: done_rx,
    }
}
