//! 잡 이벤트 타입 — 상태 전이, 페이지, 진행률
//!
//! 스캔 잡의 생명주기에서 발생하는 모든 관측 가능한 사건을 정의합니다.
//! [`StatusTransition`]은 상태 변경마다 구독자에게 전달되는 불변 레코드이며,
//! [`PageItem`]은 파이프라인을 통과하는 생산 단위입니다.

use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 스캔 잡 생명주기 상태
///
/// 상태 전환:
/// ```text
/// Created → Processing → {Succeeded, Canceled, Failed}
/// ```
///
/// 종료 상태(`Succeeded`, `Canceled`, `Failed`)에서는 어떤 전이도
/// 일어나지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// 생성됨 — 파이프라인 시작 전
    Created,
    /// 파이프라인 실행 중, 페이지가 생산되는 대로 소비 가능
    Processing,
    /// 모든 페이지가 전달되고 정상 종료됨
    Succeeded,
    /// 명시적 취소로 종료됨
    Canceled,
    /// 생산자 에러로 종료됨
    Failed,
}

impl JobState {
    /// 종료 상태 여부를 반환합니다.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Canceled | Self::Failed)
    }

    /// eSCL JobState 와이어 표기를 반환합니다.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Created => "Pending",
            Self::Processing => "Processing",
            Self::Succeeded => "Completed",
            Self::Canceled => "Canceled",
            Self::Failed => "Aborted",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Processing => write!(f, "processing"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Canceled => write!(f, "canceled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// 상태 전이 레코드
///
/// 잡 상태가 바뀔 때마다 생성되는 불변 이벤트입니다.
/// 구독자에게는 발생 순서대로, 전이당 최대 한 번 전달되며,
/// 전이 이후에 등록한 구독자는 과거 전이를 받지 못합니다.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    /// 이전 상태
    pub from: JobState,
    /// 새 상태
    pub to: JobState,
    /// 전이 발생 시각
    pub at: SystemTime,
    /// 전이 사유 (취소, 에러 메시지 등)
    pub reason: Option<String>,
}

impl StatusTransition {
    /// 새 전이 레코드를 생성합니다.
    pub fn new(from: JobState, to: JobState, reason: Option<String>) -> Self {
        Self {
            from,
            to,
            at: SystemTime::now(),
            reason,
        }
    }
}

impl fmt::Display for StatusTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} -> {} ({})", self.from, self.to, reason),
            None => write!(f, "{} -> {}", self.from, self.to),
        }
    }
}

/// 생산된 문서 페이지 한 장
///
/// 생산 순서를 나타내는 시퀀스 번호와 불투명한 페이로드를 담습니다.
/// 페이로드는 `bytes::Bytes`로 복사 없이 소비자에게 전달됩니다.
/// 각 페이지는 해당 잡의 HTTP 응답 작성자가 정확히 한 번 소비합니다.
#[derive(Debug, Clone)]
pub struct PageItem {
    /// 생산 순서 (1부터 시작)
    pub seq: u32,
    /// 페이지 페이로드
    pub data: Bytes,
}

impl PageItem {
    /// 새 페이지를 생성합니다.
    pub fn new(seq: u32, data: Bytes) -> Self {
        Self { seq, data }
    }
}

impl fmt::Display for PageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page #{} ({} bytes)", self.seq, self.data.len())
    }
}

/// 페이지 진행률 이벤트
///
/// 생산자가 보고하는 페이지 단위 진행 상황입니다.
/// Progress 엔드포인트가 이 이벤트를 줄 단위 텍스트로 중계합니다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// 현재 페이지 진행률 (0.0 ~ 1.0)
    Page(f64),
    /// 현재 페이지 생산 완료
    PageEnd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_display() {
        assert_eq!(JobState::Created.to_string(), "created");
        assert_eq!(JobState::Processing.to_string(), "processing");
        assert_eq!(JobState::Succeeded.to_string(), "succeeded");
        assert_eq!(JobState::Canceled.to_string(), "canceled");
        assert_eq!(JobState::Failed.to_string(), "failed");
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Created.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn wire_names_match_escl() {
        assert_eq!(JobState::Created.wire_name(), "Pending");
        assert_eq!(JobState::Processing.wire_name(), "Processing");
        assert_eq!(JobState::Succeeded.wire_name(), "Completed");
        assert_eq!(JobState::Canceled.wire_name(), "Canceled");
        assert_eq!(JobState::Failed.wire_name(), "Aborted");
    }

    #[test]
    fn job_state_serialize_deserialize() {
        let state = JobState::Processing;
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }

    #[test]
    fn transition_display_with_reason() {
        let t = StatusTransition::new(
            JobState::Processing,
            JobState::Failed,
            Some("paper jam".to_owned()),
        );
        assert_eq!(t.to_string(), "processing -> failed (paper jam)");
    }

    #[test]
    fn transition_display_without_reason() {
        let t = StatusTransition::new(JobState::Created, JobState::Processing, None);
        assert_eq!(t.to_string(), "created -> processing");
    }

    #[test]
    fn page_item_display() {
        let page = PageItem::new(3, Bytes::from_static(b"abcd"));
        assert_eq!(page.to_string(), "page #3 (4 bytes)");
    }
}
