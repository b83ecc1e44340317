//! 스캔 잡 계약 — 디바이스 잡 팩토리가 생산하는 객체의 인터페이스
//!
//! [`ScanJob`] trait은 하나의 스캔 요청이 따라야 하는 계약입니다.
//! 코어는 페이지가 실제로 어떻게 생산되는지 알지 못하며,
//! 레지스트리와 프로토콜 레이어는 이 trait만으로 잡을 구동합니다.
//!
//! # 생명주기
//! ```text
//! Created → Processing → {Succeeded, Canceled, Failed}
//! ```

use std::future::Future;
use std::pin::Pin;

use tokio::io::AsyncWrite;

use crate::error::ScanpostError;
use crate::event::{JobState, StatusTransition};

/// dyn-compatible 미래 타입
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 문서/진행률/에러 출력 대상
pub type DocumentSink<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// 상태 전이 구독 콜백
///
/// 전이 발생 순서대로, 전이당 최대 한 번 호출됩니다.
pub type TransitionListener = Box<dyn Fn(&StatusTransition) + Send + Sync>;

// ─── ScanJob Trait ───────────────────────────────────────────────────

/// 하나의 스캔 잡이 구현하는 trait
///
/// 디바이스 설정의 잡 팩토리가 이 trait을 구현한 객체를 반환하며,
/// 반환 시점에 이미 페이지 생산 파이프라인이 시작되어 있어야 합니다.
///
/// # 동시성 계약
///
/// - `wait_for_next_document`/`write_document_to`는 문서당 단일 소비자를
///   전제합니다. 프로토콜 레이어가 잡 단위 락으로 직렬화합니다.
/// - `state`/`write_progress_to`/`write_error_details_to`는 어느 상태에서든
///   호출 가능하며 페이지 생산을 기다리며 멈추지 않습니다.
/// - `cancel`은 멱등이며, 종료 상태에서는 아무 일도 하지 않습니다.
pub trait ScanJob: Send + Sync {
    /// 현재 생명주기 상태를 반환합니다.
    fn state(&self) -> JobState;

    /// 생산되는 문서의 Content-Type을 반환합니다.
    fn content_type(&self) -> &str;

    /// 취소를 요청합니다.
    ///
    /// 협조적 취소입니다. 생산자는 다음 페이지 전달 시점에 취소를
    /// 관측하며, 잡은 그때 `Canceled`로 정착합니다. 즉시 반영을
    /// 기대해서는 안 됩니다.
    fn cancel(&self);

    /// 상태 전이 구독자를 등록합니다.
    ///
    /// 여러 구독자를 등록할 수 있으며 호출 순서는 전이 순서와 같습니다.
    /// 등록 이전에 발생한 전이는 소급 전달되지 않습니다.
    fn register_transition_listener(&self, listener: TransitionListener);

    /// 다음 문서가 준비될 때까지 기다립니다.
    ///
    /// - `Ok(true)`: 문서가 준비됨 — `write_document_to`로 읽을 수 있음
    /// - `Ok(false)`: 에러 없는 종료 상태에 도달했고 남은 문서가 없음
    /// - `Err(_)`: 종료 상태가 `Failed`인 경우 잡 에러
    fn wait_for_next_document(
        &self,
    ) -> impl Future<Output = Result<bool, ScanpostError>> + Send;

    /// 현재 문서의 바이트를 출력 대상에 스트리밍합니다.
    ///
    /// `wait_for_next_document`가 `true`를 반환한 뒤에만 호출해야 하며,
    /// 같은 문서에 대한 중첩 호출은 지원하지 않습니다.
    /// 쓰기가 끝까지 성공한 경우에만 다음 문서로 진행합니다.
    fn write_document_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> impl Future<Output = Result<(), ScanpostError>> + Send;

    /// 현재 페이지의 진행률을 줄 단위 텍스트로 스트리밍합니다.
    ///
    /// 각 줄은 0과 1 사이의 소수입니다. 페이지가 끝나거나 잡이 종료되면
    /// 반환합니다. 이미 종료된 잡이면 즉시 반환합니다.
    fn write_progress_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> impl Future<Output = Result<(), ScanpostError>> + Send;

    /// 호출 시점의 에러 스냅샷을 XML 문서로 출력합니다.
    ///
    /// 상태와 무관하게 항상 사용할 수 있습니다.
    fn write_error_details_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> impl Future<Output = Result<(), ScanpostError>> + Send;
}

// ─── DynScanJob Trait ────────────────────────────────────────────────

/// dyn-compatible 스캔 잡 trait
///
/// `ScanJob`은 RPITIT를 사용하므로 `dyn ScanJob`이 불가합니다.
/// `DynScanJob`은 `BoxFuture`를 반환하여 레지스트리가
/// `Arc<dyn DynScanJob>`으로 잡을 동적 관리할 수 있게 합니다.
pub trait DynScanJob: Send + Sync {
    /// 현재 생명주기 상태를 반환합니다.
    fn state(&self) -> JobState;

    /// 생산되는 문서의 Content-Type을 반환합니다.
    fn content_type(&self) -> &str;

    /// 취소를 요청합니다.
    fn cancel(&self);

    /// 상태 전이 구독자를 등록합니다.
    fn register_transition_listener(&self, listener: TransitionListener);

    /// 다음 문서가 준비될 때까지 기다립니다.
    fn wait_for_next_document(&self) -> BoxFuture<'_, Result<bool, ScanpostError>>;

    /// 현재 문서의 바이트를 출력 대상에 스트리밍합니다.
    fn write_document_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> BoxFuture<'a, Result<(), ScanpostError>>;

    /// 현재 페이지의 진행률을 스트리밍합니다.
    fn write_progress_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> BoxFuture<'a, Result<(), ScanpostError>>;

    /// 호출 시점의 에러 스냅샷을 출력합니다.
    fn write_error_details_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> BoxFuture<'a, Result<(), ScanpostError>>;
}

/// ScanJob을 구현한 타입은 자동으로 DynScanJob도 구현됩니다.
impl<T: ScanJob> DynScanJob for T {
    fn state(&self) -> JobState {
        ScanJob::state(self)
    }

    fn content_type(&self) -> &str {
        ScanJob::content_type(self)
    }

    fn cancel(&self) {
        ScanJob::cancel(self);
    }

    fn register_transition_listener(&self, listener: TransitionListener) {
        ScanJob::register_transition_listener(self, listener);
    }

    fn wait_for_next_document(&self) -> BoxFuture<'_, Result<bool, ScanpostError>> {
        Box::pin(ScanJob::wait_for_next_document(self))
    }

    fn write_document_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> BoxFuture<'a, Result<(), ScanpostError>> {
        Box::pin(ScanJob::write_document_to(self, out))
    }

    fn write_progress_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> BoxFuture<'a, Result<(), ScanpostError>> {
        Box::pin(ScanJob::write_progress_to(self, out))
    }

    fn write_error_details_to<'a>(
        &'a self,
        out: DocumentSink<'a>,
    ) -> BoxFuture<'a, Result<(), ScanpostError>> {
        Box::pin(ScanJob::write_error_details_to(self, out))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::error::JobError;

    /// 테스트용 Mock 잡 — 고정된 문서 목록을 차례로 반환합니다.
    struct MockJob {
        state: Mutex<JobState>,
        remaining: Mutex<u32>,
        listeners: Mutex<Vec<TransitionListener>>,
    }

    impl MockJob {
        fn with_documents(count: u32) -> Self {
            Self {
                state: Mutex::new(JobState::Processing),
                remaining: Mutex::new(count),
                listeners: Mutex::new(Vec::new()),
            }
        }

        fn current_state(&self) -> JobState {
            *self.state.lock().unwrap()
        }

        fn transition(&self, to: JobState) {
            let mut state = self.state.lock().unwrap();
            let record = StatusTransition::new(*state, to, None);
            *state = to;
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
            if self.current_state() == JobState::Failed {
                return Err(JobError::Failed {
                    cause: "mock failure".to_owned(),
                }
                .into());
            }
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                Ok(true)
            } else {
                drop(remaining);
                if !self.current_state().is_terminal() {
                    self.transition(JobState::Succeeded);
                }
                Ok(false)
            }
        }

        async fn write_document_to<'a>(
            &'a self,
            out: DocumentSink<'a>,
        ) -> Result<(), ScanpostError> {
            out.write_all(b"mock-page").await?;
            Ok(())
        }

        async fn write_progress_to<'a>(
            &'a self,
            out: DocumentSink<'a>,
        ) -> Result<(), ScanpostError> {
            out.write_all(b"1\n").await?;
            Ok(())
        }

        async fn write_error_details_to<'a>(
            &'a self,
            out: DocumentSink<'a>,
        ) -> Result<(), ScanpostError> {
            out.write_all(b"<ErrorDetails/>").await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn dyn_job_can_be_boxed() {
        let job: std::sync::Arc<dyn DynScanJob> =
            std::sync::Arc::new(MockJob::with_documents(2));

        assert_eq!(job.state(), JobState::Processing);
        assert_eq!(job.content_type(), "image/jpeg");

        assert!(job.wait_for_next_document().await.unwrap());
        assert!(job.wait_for_next_document().await.unwrap());
        assert!(!job.wait_for_next_document().await.unwrap());
        assert_eq!(job.state(), JobState::Succeeded);
    }

    #[tokio::test]
    async fn document_write_through_dyn_sink() {
        let job: std::sync::Arc<dyn DynScanJob> =
            std::sync::Arc::new(MockJob::with_documents(1));
        assert!(job.wait_for_next_document().await.unwrap());

        let mut buf = Vec::new();
        job.write_document_to(&mut buf).await.unwrap();
        assert_eq!(buf, b"mock-page");
    }

    // MockJob은 ScanJob과 (블랭킷으로) DynScanJob을 동시에 구현하므로
    // 구체 타입 호출은 트레이트를 명시한다.
    #[tokio::test]
    async fn listeners_receive_transitions_in_order() {
        let job = MockJob::with_documents(0);
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen_clone = std::sync::Arc::clone(&seen);
        ScanJob::register_transition_listener(
            &job,
            Box::new(move |t| {
                seen_clone.lock().unwrap().push((t.from, t.to));
            }),
        );

        assert!(!ScanJob::wait_for_next_document(&job).await.unwrap());
        ScanJob::cancel(&job); // 종료 상태 이후의 취소는 무시됨

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[(JobState::Processing, JobState::Succeeded)]
        );
    }

    #[tokio::test]
    async fn failed_job_surfaces_error_on_wait() {
        let job = MockJob::with_documents(1);
        job.transition(JobState::Failed);

        let err = ScanJob::wait_for_next_document(&job).await.unwrap_err();
        assert!(matches!(
            err,
            ScanpostError::Job(JobError::Failed { .. })
        ));
    }
}
